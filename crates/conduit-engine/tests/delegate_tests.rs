use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use conduit_engine::{
    factory_of, invoke, strategy_of, supplier_fn, Backend, ClassBuilder, CodegenBackend, CodegenError,
    CompiledUnit, DelegateFactory, DispatchConfig, DispatchError, FromValue, Interface,
    InterfaceBuilder, InterfaceShape, SimulatedHost, StrategyKind, StubBackend, TemplateBackend,
    Thrown, ThrownKind, ToValue, Value, ValueType,
};
use parking_lot::Mutex;

// Interface used by most scenarios: getInt(): int, toString(int): String
fn source_iface() -> Arc<Interface> {
    InterfaceBuilder::new("Source")
        .method("getInt", &[], ValueType::I32)
        .method("toString", &[ValueType::I32], ValueType::Str)
        .build()
        .unwrap()
}

fn source_impl(iface: &Arc<Interface>, n: i32) -> Value {
    ClassBuilder::new("FixedSource")
        .implements(iface)
        .field("n", ValueType::I32)
        .constructor(&[ValueType::I32], |this, args| {
            this.set_field_by_name("n", args[0].clone());
            Ok(())
        })
        .method("getInt", &[], ValueType::I32, |this, _| {
            Ok(this.field_by_name("n").unwrap_or_default())
        })
        .method("toString", &[ValueType::I32], ValueType::Str, |_, args| {
            Ok(Value::str(&args[0].as_i32().unwrap_or(0).to_string()))
        })
        .build()
        .unwrap()
        .new_instance(&[Value::I32(n)])
        .unwrap()
}

fn factory_on(host: SimulatedHost) -> DelegateFactory {
    DelegateFactory::with_parts(
        DispatchConfig::default(),
        Arc::new(host),
        Arc::new(TemplateBackend::default()),
    )
}

const CAFEBABE: i32 = 0xCAFE_BABE_u32 as i32;

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_get_int_scenario_counts_supplier_calls() {
    let iface = source_iface();
    let factory = factory_on(SimulatedHost::new());

    let backing = Arc::new(Mutex::new(source_impl(&iface, CAFEBABE)));
    let calls = Arc::new(AtomicUsize::new(0));
    let wrapper = {
        let backing = backing.clone();
        let calls = calls.clone();
        factory
            .create_wrapper(&iface, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(backing.lock().clone())
            })
            .unwrap()
    };
    assert_eq!(strategy_of(&wrapper), Some(StrategyKind::Generated));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let got = invoke(&wrapper, "getInt", &[]).unwrap();
    assert_eq!(i32::from_value(&got).unwrap(), CAFEBABE);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let text = invoke(&wrapper, "toString", &[1i32.to_value()]).unwrap();
    assert_eq!(String::from_value(&text).unwrap(), "1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    *backing.lock() = source_impl(&iface, 7);
    assert_eq!(invoke(&wrapper, "getInt", &[]).unwrap(), Value::I32(7));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_codegen_unavailable_uses_reflective() {
    let iface = source_iface();
    let factory = factory_on(SimulatedHost::without(Backend::Codegen));
    assert!(!factory.probe().is_available_id("codegen"));

    let target = source_impl(&iface, CAFEBABE);
    let wrapper = factory.create_wrapper(&iface, move || Ok(target.clone())).unwrap();
    assert_eq!(strategy_of(&wrapper), Some(StrategyKind::Reflective));
    assert_eq!(invoke(&wrapper, "getInt", &[]).unwrap(), Value::I32(CAFEBABE));
    assert_eq!(
        invoke(&wrapper, "toString", &[Value::I32(1)]).unwrap(),
        Value::str("1")
    );
    assert_eq!(factory.loader().live_modules(), 0);
}

#[test]
fn test_strategies_are_observably_equivalent() {
    let iface = source_iface();
    let factory = factory_on(SimulatedHost::new());
    let target = source_impl(&iface, 99);

    let wrappers: Vec<Value> = [StrategyKind::Generated, StrategyKind::Reflective]
        .into_iter()
        .map(|kind| {
            let target = target.clone();
            factory
                .create_wrapper_with(kind, &iface, supplier_fn(move || Ok(target.clone())))
                .unwrap()
        })
        .collect();

    for args in [vec![Value::I32(0)], vec![Value::I32(-12)], vec![Value::I64(3)]] {
        let outcomes: Vec<_> = wrappers
            .iter()
            .map(|w| invoke(w, "toString", &args).map_err(|e| e.kind()))
            .collect();
        assert_eq!(outcomes[0], outcomes[1], "args {:?}", args);
    }
    let gets: Vec<_> = wrappers.iter().map(|w| invoke(w, "getInt", &[]).unwrap()).collect();
    assert_eq!(gets[0], gets[1]);
}

#[test]
fn test_null_backing_fails_identically() {
    let iface = source_iface();
    let factory = factory_on(SimulatedHost::new());
    for kind in [StrategyKind::Generated, StrategyKind::Reflective] {
        let wrapper = factory
            .create_wrapper_with(kind, &iface, supplier_fn(|| Ok(Value::Null)))
            .unwrap();
        let err = invoke(&wrapper, "getInt", &[]).unwrap_err();
        assert_eq!(err.kind(), ThrownKind::NullReceiver, "{}", kind);
    }
}

#[test]
fn test_thrown_identity_is_preserved() {
    let iface = source_iface();
    let boom = Thrown::user("boom");
    let failing = {
        let boom = boom.clone();
        ClassBuilder::new("Failing")
            .implements(&iface)
            .method("getInt", &[], ValueType::I32, move |_, _| Err(boom.clone()))
            .method("toString", &[ValueType::I32], ValueType::Str, |_, _| {
                Ok(Value::str(""))
            })
            .build()
            .unwrap()
            .new_instance(&[])
            .unwrap()
    };

    let factory = factory_on(SimulatedHost::new());
    for kind in [StrategyKind::Generated, StrategyKind::Reflective] {
        let target = failing.clone();
        let wrapper = factory
            .create_wrapper_with(kind, &iface, supplier_fn(move || Ok(target.clone())))
            .unwrap();
        let err = invoke(&wrapper, "getInt", &[]).unwrap_err();
        assert!(err.ptr_eq(&boom), "{}", kind);
    }

    // Supplier errors pass through too
    let supplier_err = Thrown::user("no backing");
    let wrapper = {
        let e = supplier_err.clone();
        factory.create_wrapper(&iface, move || Err(e.clone())).unwrap()
    };
    assert!(invoke(&wrapper, "getInt", &[]).unwrap_err().ptr_eq(&supplier_err));
}

#[test]
fn test_wrapper_can_back_another_wrapper() {
    let iface = source_iface();
    let factory = factory_on(SimulatedHost::new());
    let target = source_impl(&iface, 5);
    let inner = factory.create_wrapper(&iface, move || Ok(target.clone())).unwrap();
    let outer = {
        let inner = inner.clone();
        factory
            .create_wrapper_with(
                StrategyKind::Reflective,
                &iface,
                supplier_fn(move || Ok(inner.clone())),
            )
            .unwrap()
    };
    assert_eq!(invoke(&outer, "getInt", &[]).unwrap(), Value::I32(5));
}

#[test]
fn test_backing_of_wrong_type() {
    let iface = source_iface();
    let other = ClassBuilder::new("Unrelated")
        .method("getInt", &[], ValueType::I32, |_, _| Ok(Value::I32(1)))
        .build()
        .unwrap()
        .new_instance(&[])
        .unwrap();
    let factory = factory_on(SimulatedHost::new());
    for kind in [StrategyKind::Generated, StrategyKind::Reflective] {
        let target = other.clone();
        let wrapper = factory
            .create_wrapper_with(kind, &iface, supplier_fn(move || Ok(target.clone())))
            .unwrap();
        let err = invoke(&wrapper, "getInt", &[]).unwrap_err();
        assert_eq!(err.kind(), ThrownKind::WrongReceiver, "{}", kind);
    }
}

// ============================================================================
// Fallback
// ============================================================================

#[test]
fn test_rejected_module_falls_back_per_shape() {
    let factory = DelegateFactory::with_parts(
        DispatchConfig::default(),
        Arc::new(SimulatedHost::new()),
        Arc::new(StubBackend),
    );
    let iface = source_iface();
    let target = source_impl(&iface, 3);
    let wrapper = factory.create_wrapper(&iface, move || Ok(target.clone())).unwrap();
    assert_eq!(strategy_of(&wrapper), Some(StrategyKind::Reflective));
    assert_eq!(invoke(&wrapper, "getInt", &[]).unwrap(), Value::I32(3));
    assert_eq!(factory.loader().live_modules(), 0);
}

/// Emits trap bodies slowly and counts how often it was asked
#[derive(Default)]
struct CountingStub {
    emits: AtomicUsize,
}

impl CodegenBackend for CountingStub {
    fn name(&self) -> &str {
        "counting-stub"
    }

    fn emit(&self, shape: &InterfaceShape) -> Result<CompiledUnit, CodegenError> {
        self.emits.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        StubBackend.emit(shape)
    }
}

#[test]
fn test_concurrent_failure_attempted_once() {
    const THREADS: usize = 8;
    let config = DispatchConfig {
        retry_backoff_ms: 60_000,
        max_retry_backoff_ms: 60_000,
        ..Default::default()
    };
    let backend = Arc::new(CountingStub::default());
    let factory =
        DelegateFactory::with_parts(config, Arc::new(SimulatedHost::new()), backend.clone());
    let iface = source_iface();
    let target = source_impl(&iface, 11);
    let barrier = Barrier::new(THREADS);

    let wrappers: Vec<Value> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let target = target.clone();
                let (factory, iface, barrier) = (&factory, &iface, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    factory.create_wrapper(iface, move || Ok(target.clone())).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(backend.emits.load(Ordering::SeqCst), 1);
    let shape = InterfaceShape::of(&iface);
    assert_eq!(factory.failures().attempts(&shape), 1);
    assert!(factory.failures().retry_in(&shape).unwrap() > Duration::from_secs(50));
    for w in &wrappers {
        assert_eq!(strategy_of(w), Some(StrategyKind::Reflective));
        assert_eq!(invoke(w, "getInt", &[]).unwrap(), Value::I32(11));
    }
}

#[test]
fn test_arity_limit_falls_back() {
    let config = DispatchConfig {
        max_generated_arity: 1,
        ..Default::default()
    };
    let factory = DelegateFactory::with_parts(
        config,
        Arc::new(SimulatedHost::new()),
        Arc::new(TemplateBackend::new(1)),
    );
    let wide = InterfaceBuilder::new("Wide")
        .method("sum", &[ValueType::I32, ValueType::I32], ValueType::I32)
        .build()
        .unwrap();
    let narrow = source_iface();

    let w = factory.create_wrapper(&wide, || Ok(Value::Null)).unwrap();
    let n = factory.create_wrapper(&narrow, || Ok(Value::Null)).unwrap();
    assert_eq!(strategy_of(&w), Some(StrategyKind::Reflective));
    assert_eq!(strategy_of(&n), Some(StrategyKind::Generated));
}

#[test]
fn test_retry_after_backoff() {
    let config = DispatchConfig {
        retry_backoff_ms: 0,
        max_retry_backoff_ms: 0,
        ..Default::default()
    };
    let factory =
        DelegateFactory::with_parts(config, Arc::new(SimulatedHost::new()), Arc::new(StubBackend));
    let iface = source_iface();
    let shape = InterfaceShape::of(&iface);

    let _a = factory.create_wrapper(&iface, || Ok(Value::Null)).unwrap();
    let _b = factory.create_wrapper(&iface, || Ok(Value::Null)).unwrap();
    assert_eq!(factory.failures().attempts(&shape), 2);
    assert_eq!(factory.cache_stats().failures, 2);
}

#[test]
fn test_capability_refresh_switches_strategy() {
    let host = Arc::new(SimulatedHost::new());
    let factory = DelegateFactory::with_parts(
        DispatchConfig::default(),
        host.clone(),
        Arc::new(TemplateBackend::default()),
    );
    let iface = source_iface();
    assert_eq!(factory.strategy_for(&iface), StrategyKind::Generated);

    host.set(Backend::Codegen, false);
    assert_eq!(factory.strategy_for(&iface), StrategyKind::Generated);
    assert!(!factory.probe().refresh(Backend::Codegen));
    assert_eq!(factory.strategy_for(&iface), StrategyKind::Reflective);
}

// ============================================================================
// Shape keys
// ============================================================================

#[test]
fn test_same_name_in_other_module_not_shared() {
    let build = |module: &str| {
        InterfaceBuilder::new("Source")
            .module(module)
            .method("getInt", &[], ValueType::I32)
            .build()
            .unwrap()
    };
    let (a, b) = (build("alpha"), build("beta"));
    let factory = factory_on(SimulatedHost::new());

    for kind in [StrategyKind::Generated, StrategyKind::Reflective] {
        let wa = factory
            .create_wrapper_with(kind, &a, supplier_fn(|| Ok(Value::Null)))
            .unwrap();
        let wb = factory
            .create_wrapper_with(kind, &b, supplier_fn(|| Ok(Value::Null)))
            .unwrap();
        let (fa, fb) = (factory_of(&wa).unwrap(), factory_of(&wb).unwrap());
        assert!(!Arc::ptr_eq(&fa, &fb), "{}", kind);
        assert_eq!(fa.class().module(), "alpha");
        assert_eq!(fb.class().module(), "beta");
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_malformed_interfaces_rejected() {
    let factory = factory_on(SimulatedHost::new());
    let empty = InterfaceBuilder::new("Nothing").build().unwrap();
    assert!(matches!(
        factory.create_wrapper(&empty, || Ok(Value::Null)),
        Err(DispatchError::MalformedInterface { .. })
    ));

    assert!(InterfaceBuilder::new("Dup")
        .method("a", &[], ValueType::I32)
        .method("a", &[], ValueType::Str)
        .build()
        .is_err());
    assert!(InterfaceBuilder::new("VoidParam")
        .method("a", &[ValueType::Void], ValueType::I32)
        .build()
        .is_err());
}
