//! Interception Proxy Integration Tests
//!
//! Tests validate:
//! - Pass-through of every message when nothing is intercepted
//! - Short-circuiting handlers that supply the result themselves
//! - Forwarding after the handler rewrites arguments, message or target
//! - Handlers that reconfigure the table while they run
//! - Concurrent dispatch and reconfiguration
//! - Target ownership
//!
//! # Running Tests
//! ```bash
//! cargo test --test proxy_tests
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use objrt_core::{
    invoke, DispatchError, DispatchResult, InterceptionProxy, MessageId, MethodBuilder, ObjectRef,
    Protocol, Runtime, Scope, Signature, Type, TypeBuilder, Value,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn send(target: &Value, message: &str, args: &[Value]) -> DispatchResult<Value> {
    invoke(target, &MessageId::new(message), args)
}

/// A target type that records every call it executes
struct Recorder {
    ty: Arc<Type>,
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
}

fn recorder(runtime: &Runtime) -> Recorder {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut builder = TypeBuilder::create(runtime, "Recorder", runtime.root_type()).unwrap();
    builder.add_field("total", "q").unwrap();

    let log = Arc::clone(&calls);
    let mut add = MethodBuilder::with_closure_returning("add:", "q", move |receiver, args| {
        log.lock().push(("add:".to_string(), args.to_vec()));
        let this = receiver.as_object().and_then(ObjectRef::as_instance).ok_or("no instance")?;
        let total = this.get_field("total")?.as_i64().unwrap_or(0) + args[0].as_i64().unwrap_or(0);
        this.set_field("total", Value::i64(total))?;
        Ok(Value::i64(total))
    });
    add.set_parameter_type(0, "q");
    builder.add_method(&mut add, Scope::Instance);

    let log = Arc::clone(&calls);
    let mut subtract = MethodBuilder::with_closure_returning("subtract:", "q", move |receiver, args| {
        log.lock().push(("subtract:".to_string(), args.to_vec()));
        let this = receiver.as_object().and_then(ObjectRef::as_instance).ok_or("no instance")?;
        let total = this.get_field("total")?.as_i64().unwrap_or(0) - args[0].as_i64().unwrap_or(0);
        this.set_field("total", Value::i64(total))?;
        Ok(Value::i64(total))
    });
    subtract.set_parameter_type(0, "q");
    builder.add_method(&mut subtract, Scope::Instance);

    let log = Arc::clone(&calls);
    let mut describe = MethodBuilder::with_closure_returning("describe:with:", "@", move |_, args| {
        log.lock().push(("describe:with:".to_string(), args.to_vec()));
        Ok(args[1].clone())
    });
    describe.set_parameter_type(0, "d");
    describe.set_parameter_type(1, "@");
    builder.add_method(&mut describe, Scope::Instance);

    Recorder {
        ty: builder.seal(),
        calls,
    }
}

impl Recorder {
    fn instance(&self) -> Value {
        Value::Object(ObjectRef::Instance(self.ty.instantiate()))
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

// ===== Pass-Through =====

#[test]
fn test_empty_table_passes_everything_through() {
    init_logging();
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);

    let direct = recorder.instance();
    let wrapped = recorder.instance();
    let proxy = InterceptionProxy::new(wrapped).into_value();

    for amount in [5, -3, 12] {
        let expected = send(&direct, "add:", &[Value::i64(amount)]).unwrap();
        let actual = send(&proxy, "add:", &[Value::i64(amount)]).unwrap();
        assert_eq!(actual, expected);
    }
    let note = Value::Object(ObjectRef::Instance(recorder.ty.instantiate()));
    assert_eq!(
        send(&proxy, "describe:with:", &[Value::f64(1.5), note.clone()]).unwrap(),
        send(&direct, "describe:with:", &[Value::f64(1.5), note]).unwrap()
    );

    // errors pass through unchanged as well
    assert_eq!(
        send(&proxy, "add:", &[Value::bool(true)]).unwrap_err(),
        send(&direct, "add:", &[Value::bool(true)]).unwrap_err()
    );
    assert!(matches!(
        send(&proxy, "missing", &[]),
        Err(DispatchError::UnknownMessage { .. })
    ));
}

#[test]
fn test_proxy_resolves_target_signatures() {
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());

    let signature = proxy.signature_for(&MessageId::new("describe:with:")).unwrap();
    assert_eq!(signature.encoded(), "@32@0:8d16@24");
    let via_runtime =
        objrt_core::resolve_signature(&Arc::clone(&proxy).into_value(), &MessageId::new("add:")).unwrap();
    assert_eq!(via_runtime.encoded(), "q24@0:8q16");
    assert!(proxy.signature_for(&MessageId::new("missing")).is_none());
}

// ===== Short-Circuit =====

#[test]
fn test_short_circuit_skips_target() {
    init_logging();
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());

    proxy.intercept("add:", None, |_, invocation| {
        invocation.set_return_value(Value::i64(1234));
        false
    });
    let value = Arc::clone(&proxy).into_value();
    assert_eq!(send(&value, "add:", &[Value::i64(1)]).unwrap(), Value::i64(1234));
    assert_eq!(recorder.call_count(), 0);

    // other messages are untouched
    assert_eq!(send(&value, "subtract:", &[Value::i64(1)]).unwrap(), Value::i64(-1));
    assert_eq!(recorder.call_count(), 1);
}

#[test]
fn test_short_circuit_without_return_value() {
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());
    proxy.intercept("add:", None, |_, _| false);

    // the return slot starts zeroed for the method's `q` return type
    assert_eq!(proxy.send(&MessageId::new("add:"), &[Value::i64(3)]).unwrap(), Value::i64(0));
    assert_eq!(recorder.call_count(), 0);
}

// ===== Forward After Mutate =====

#[test]
fn test_forward_sees_mutated_argument() {
    init_logging();
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());

    proxy.intercept("add:", None, |_, invocation| {
        let original = invocation.argument(0).and_then(Value::as_i64).unwrap_or(0);
        invocation.set_argument(0, Value::i64(original * 10));
        true
    });
    let value = proxy.into_value();
    assert_eq!(send(&value, "add:", &[Value::i64(4)]).unwrap(), Value::i64(40));

    let calls = recorder.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ("add:".to_string(), vec![Value::i64(40)]));
}

#[test]
fn test_forward_with_rewritten_message() {
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());

    proxy.intercept("add:", None, |_, invocation| {
        invocation.set_message_id("subtract:");
        true
    });
    assert_eq!(proxy.send(&MessageId::new("add:"), &[Value::i64(7)]).unwrap(), Value::i64(-7));
    assert_eq!(recorder.calls.lock()[0].0, "subtract:");
}

#[test]
fn test_forward_to_another_target() {
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let primary = recorder.instance();
    let secondary = recorder.instance();
    let proxy = InterceptionProxy::new(primary.clone());

    let redirect = secondary.clone();
    proxy.intercept("add:", None, move |_, invocation| {
        invocation.set_target(redirect.clone());
        true
    });
    proxy.send(&MessageId::new("add:"), &[Value::i64(9)]).unwrap();

    assert_eq!(send(&secondary, "add:", &[Value::i64(0)]).unwrap(), Value::i64(9));
    assert_eq!(send(&primary, "add:", &[Value::i64(0)]).unwrap(), Value::i64(0));
}

#[test]
fn test_forward_to_cleared_target_returns_slot() {
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());

    proxy.intercept("add:", None, |_, invocation| {
        invocation.set_target(Value::Null);
        invocation.set_return_value(Value::i64(-1));
        true
    });
    assert_eq!(proxy.send(&MessageId::new("add:"), &[Value::i64(9)]).unwrap(), Value::i64(-1));
    assert_eq!(recorder.call_count(), 0);
}

// ===== Reentrancy and Snapshots =====

#[test]
fn test_handler_removes_itself() {
    init_logging();
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    proxy.intercept("add:", None, move |proxy, invocation| {
        counter.fetch_add(1, Ordering::SeqCst);
        assert!(proxy.remove_interception(&MessageId::new("add:")));
        invocation.set_return_value(Value::i64(0));
        false
    });

    // the in-flight dispatch completes with the handler it looked up
    assert_eq!(proxy.send(&MessageId::new("add:"), &[Value::i64(2)]).unwrap(), Value::i64(0));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!proxy.is_intercepting(&MessageId::new("add:")));

    // later sends pass through
    assert_eq!(proxy.send(&MessageId::new("add:"), &[Value::i64(2)]).unwrap(), Value::i64(2));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handler_installs_interceptions_and_sends_reentrantly() {
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());

    proxy.intercept("add:", None, |proxy, invocation| {
        proxy.intercept("subtract:", None, |_, inner| {
            inner.set_return_value(Value::i64(100));
            false
        });
        // sending to the proxy from inside a handler must not deadlock
        let inner = proxy.send(&MessageId::new("subtract:"), &[Value::i64(1)]).unwrap();
        invocation.set_return_value(inner);
        false
    });

    assert_eq!(proxy.send(&MessageId::new("add:"), &[Value::i64(1)]).unwrap(), Value::i64(100));
    assert!(proxy.is_intercepting(&MessageId::new("subtract:")));
    assert_eq!(proxy.interception_count(), 2);
    assert_eq!(recorder.call_count(), 0);
}

#[test]
fn test_last_registration_wins() {
    let proxy = InterceptionProxy::new(Value::Null);
    let signature = Signature::new("i", &[]);
    for answer in 1..=3 {
        proxy.intercept("answer", Some(signature.clone()), move |_, invocation| {
            invocation.set_return_value(Value::i32(answer));
            false
        });
    }
    assert_eq!(proxy.interception_count(), 1);
    assert_eq!(proxy.send(&MessageId::new("answer"), &[]).unwrap(), Value::i32(3));
}

// ===== Concurrency =====

#[test]
fn test_concurrent_dispatch_and_reconfiguration() {
    init_logging();
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let proxy = InterceptionProxy::new(recorder.instance());
    let stop = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(5));

    let senders: Vec<_> = (0..4)
        .map(|_| {
            let proxy = Arc::clone(&proxy);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for _ in 0..200 {
                    // either intercepted (returns 0) or passed through (returns a total)
                    let result = proxy.send(&MessageId::new("add:"), &[Value::i64(1)]).unwrap();
                    assert!(result.as_i64().is_some());
                }
            })
        })
        .collect();

    let toggler = {
        let proxy = Arc::clone(&proxy);
        let stop = Arc::clone(&stop);
        let barrier = Arc::clone(&barrier);
        std::thread::spawn(move || {
            barrier.wait();
            while !stop.load(Ordering::SeqCst) {
                proxy.intercept("add:", None, |_, invocation| {
                    invocation.set_return_value(Value::i64(0));
                    false
                });
                proxy.remove_interception(&MessageId::new("add:"));
            }
        })
    };

    for sender in senders {
        sender.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    toggler.join().unwrap();
    assert!(recorder.call_count() <= 800);
}

// ===== Ownership =====

#[test]
fn test_proxy_owns_its_target() {
    let runtime = Runtime::new();
    let recorder = recorder(&runtime);
    let released = Arc::new(AtomicBool::new(false));

    let instance = recorder.ty.instantiate();
    let flag = Arc::clone(&released);
    instance.add_teardown("released", move |_| flag.store(true, Ordering::SeqCst));

    let proxy = InterceptionProxy::new(Value::Object(ObjectRef::Instance(instance)));
    let handle = Arc::clone(&proxy).into_value();
    assert!(!released.load(Ordering::SeqCst));
    drop(proxy);
    assert!(!released.load(Ordering::SeqCst));
    drop(handle);
    assert!(released.load(Ordering::SeqCst));
}

// ===== Protocol Signatures =====

#[test]
fn test_protocol_supplies_signature_for_null_target() {
    let mut protocol = Protocol::new("Totals");
    protocol.add_method(Scope::Instance, "total", "q16@0:8", true).unwrap();
    let signature = protocol
        .signature_for(&MessageId::new("total"), Scope::Instance, true)
        .unwrap();

    let proxy = InterceptionProxy::new(Value::Null);
    proxy.intercept("total", Some((*signature).clone()), |_, invocation| {
        invocation.set_return_value(Value::i64(77));
        false
    });
    assert_eq!(proxy.send(&MessageId::new("total"), &[]).unwrap(), Value::i64(77));
    assert_eq!(
        proxy.signature_for(&MessageId::new("total")).unwrap().encoded(),
        "q16@0:8"
    );
}
