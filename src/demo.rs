//! Reference service used by the CLI and the integration tests.
//!
//! Mirrors the canonical methods-service sample: `Ping`, `Concatenate` and
//! `Fibonacci` are quick calls marked serialized, while `Pi` is a long
//! running calculation left concurrent so it can grind away without holding
//! up the rest of the object. Passing a very large iteration count to `Pi`
//! makes the mixed dispatch visible: serialized neighbors keep answering
//! while the series converges.

use serde_json::Value;

use crate::descriptor::{InterfaceDescriptor, MethodDescriptor};
use crate::dispatch::{FaultInfo, ServiceObject, ServiceObjectBuilder, FAULT_INVALID_ARGUMENT};
use crate::error::Result;

/// Interface name exported by the sample object.
pub const SAMPLE_INTERFACE: &str = "org.busway.sample";

/// Largest `n` for which `fibonacci` fits in a `u64`.
pub const MAX_FIBONACCI: u64 = 93;

/// The n-th Fibonacci number, `F(0) = 0`, `F(1) = 1`.
///
/// Iterative shuffle: `a, b <- a + b, (a + b) - b`. Defined for
/// `n <= MAX_FIBONACCI`; larger inputs overflow.
pub fn fibonacci(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        a += b;
        b = a - b;
    }
    a
}

/// Approximate pi with `iterations` terms of the Gregory-Leibniz series.
///
/// Sums `(-1)^k / (2k + 1)` for `k` in `[0, iterations)`, times four.
/// Convergence is slow on purpose; the method exists to be a long-running
/// concurrent call.
pub fn gregory_leibniz_pi(iterations: u64) -> f64 {
    let mut quarter = 0.0f64;
    let mut sign = 1.0f64;
    for k in 0..iterations {
        quarter += sign / (2.0 * k as f64 + 1.0);
        sign = -sign;
    }
    quarter * 4.0
}

/// Descriptor table of the sample interface.
pub fn sample_interface() -> Result<InterfaceDescriptor> {
    InterfaceDescriptor::new(SAMPLE_INTERFACE)
        .method(MethodDescriptor::new("Ping", "s", "s").serialized())?
        .method(MethodDescriptor::new("Concatenate", "ss", "s").serialized())?
        .method(MethodDescriptor::new("Fibonacci", "i", "i").serialized())?
        .method(MethodDescriptor::new("Pi", "i", "d"))
}

/// Build the sample object at `path`.
pub fn sample_object(path: &str) -> Result<ServiceObject> {
    ServiceObjectBuilder::new(path, sample_interface()?)
        .handler("Ping", |args| {
            let text = string_arg(args, 0)?;
            Ok(vec![Value::from(text)])
        })?
        .handler("Concatenate", |args| {
            let first = string_arg(args, 0)?;
            let second = string_arg(args, 1)?;
            Ok(vec![Value::from(format!("{first}{second}"))])
        })?
        .handler("Fibonacci", |args| {
            let n = unsigned_arg(args, 0)?;
            if n > MAX_FIBONACCI {
                return Err(FaultInfo::new(
                    FAULT_INVALID_ARGUMENT,
                    &format!("Fibonacci({n}) exceeds u64; n must be at most {MAX_FIBONACCI}"),
                ));
            }
            Ok(vec![Value::from(fibonacci(n))])
        })?
        .handler("Pi", |args| {
            let iterations = unsigned_arg(args, 0)?;
            Ok(vec![Value::from(gregory_leibniz_pi(iterations))])
        })?
        .build()
}

fn string_arg(args: &[Value], index: usize) -> std::result::Result<String, FaultInfo> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            FaultInfo::new(
                FAULT_INVALID_ARGUMENT,
                &format!("argument {index} must be a string"),
            )
        })
}

fn unsigned_arg(args: &[Value], index: usize) -> std::result::Result<u64, FaultInfo> {
    args.get(index).and_then(Value::as_u64).ok_or_else(|| {
        FaultInfo::new(
            FAULT_INVALID_ARGUMENT,
            &format!("argument {index} must be a non-negative integer"),
        )
    })
}
