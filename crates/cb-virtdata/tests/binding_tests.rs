use cb_virtdata::adapter::{adapt, floor_modulo_long, AdapterTable};
use cb_virtdata::{BindingCompiler, Func, Kind, Shape, Value};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

#[test]
fn test_modulo_binding_cycles() {
    let compiler = BindingCompiler::default();
    let binding = compiler.compile("Mod(5)", Kind::Value).unwrap();
    let values: Vec<Value> = (0..10).map(|c| binding.apply(c).unwrap()).collect();
    let expected: Vec<Value> = [0, 1, 2, 3, 4, 0, 1, 2, 3, 4]
        .into_iter()
        .map(Value::Long)
        .collect();
    assert_eq!(values, expected);
}

#[test]
fn test_binding_is_identical_across_threads() {
    let compiler = BindingCompiler::default();
    let binding = compiler
        .compile("Hash(); AlphaNumeric(16); Prefix('k-')", Kind::Value)
        .unwrap();
    let expected: Vec<Value> = (0..256).map(|c| binding.apply(c).unwrap()).collect();
    let expected = Arc::new(expected);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let binding = binding.clone();
            let expected = Arc::clone(&expected);
            thread::spawn(move || {
                for cycle in (0..256).rev() {
                    assert_eq!(binding.apply(cycle).unwrap(), expected[cycle as usize]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_adapter_missing_stage_kinds_are_compile_errors() {
    let compiler = BindingCompiler::default();
    let err = compiler.compile("Mod(5); Nope()", Kind::Value).unwrap_err();
    assert!(err.to_string().contains("Nope"));
    let err = compiler.compile("Div(0)", Kind::Value).unwrap_err();
    assert!(err.to_string().contains("divisor"));
}

proptest! {
    #[test]
    fn prop_compiling_twice_is_deterministic(
        recipe in prop_oneof![
            Just("Hash()"),
            Just("HashRange(0, 1000)"),
            Just("Mod(7); Mul(3)"),
            Just("AlphaNumeric(8)"),
            Just("Template('{}:{}', Hash(), Mod(10))"),
            Just("Scale(0.25); ToString()"),
            Just("ListOf(3, HashRange(1, 9))"),
        ],
        cycle in any::<i64>(),
    ) {
        let first = BindingCompiler::default().compile(recipe, Kind::Value).unwrap();
        let second = BindingCompiler::default().compile(recipe, Kind::Value).unwrap();
        prop_assert_eq!(first.apply(cycle), second.apply(cycle));
    }

    #[test]
    fn prop_long_round_trip_through_value_is_lossless(cycle in any::<i64>()) {
        let source = Func::new(|v: i64| v.wrapping_mul(31).wrapping_add(7));
        let expected = source.call(Value::Long(cycle)).unwrap();

        let unchanged = adapt(source.clone(), Shape::new(Kind::Long, Kind::Value)).unwrap();
        prop_assert_eq!(unchanged.shape(), Shape::new(Kind::Long, Kind::Long));

        let via_value = AdapterTable::global()
            .adapt_exact(source, Shape::new(Kind::Long, Kind::Value))
            .unwrap();
        prop_assert_eq!(via_value.shape(), Shape::new(Kind::Long, Kind::Value));
        let back = adapt(via_value, Shape::new(Kind::Long, Kind::Long)).unwrap();
        prop_assert_eq!(back.call(Value::Long(cycle)).unwrap(), expected);
    }

    #[test]
    fn prop_double_to_long_is_floor_modulo(x in -1.0e300f64..1.0e300f64) {
        let source = Func::new(move |_: i64| x);
        let adapted = adapt(source, Shape::new(Kind::Long, Kind::Long)).unwrap();
        let got = adapted.call(Value::Long(0)).unwrap();
        prop_assert_eq!(got, Value::Long(floor_modulo_long(x)));
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let expected = (x.floor() % (i64::MAX as f64)) as i64;
        prop_assert_eq!(floor_modulo_long(x), expected);
    }
}
