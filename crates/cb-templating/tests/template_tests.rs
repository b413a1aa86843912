use cb_templating::{
    ConfigSource, FieldParser, FieldTemplate, OpConfigError, ParsedTemplateMap, RawOpTemplate,
    TemplateError,
};
use cb_virtdata::{BindingCompiler, Value};
use indexmap::IndexMap;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn activity(pairs: &[(&str, &str)]) -> Arc<dyn ConfigSource> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Arc::new(map)
}

#[test]
fn test_concat_field_renders_cycle() {
    let raw = RawOpTemplate::new("ids")
        .with_field("key", "id-{cycle}")
        .with_binding("cycle", "Identity()");
    let op = ParsedTemplateMap::resolve(&raw, None, &BindingCompiler::default()).unwrap();
    assert_eq!(op.get("key", 42).unwrap(), Value::from("id-42"));
}

#[test]
fn test_raw_inline_binding_keeps_native_values() {
    let raw = RawOpTemplate::new("mods").with_field("m", "{{Mod(5)}}");
    let op = ParsedTemplateMap::resolve(&raw, None, &BindingCompiler::default()).unwrap();
    let values: Vec<Value> = (0..10).map(|c| op.get("m", c).unwrap()).collect();
    let expected: Vec<Value> = [0, 1, 2, 3, 4, 0, 1, 2, 3, 4]
        .into_iter()
        .map(Value::Long)
        .collect();
    assert_eq!(values, expected);
}

#[test]
fn test_precedence_law() {
    let compiler = BindingCompiler::default();
    let tiers = activity(&[("limit", "3")]);

    let all = RawOpTemplate::new("op")
        .with_field("limit", 1_i64)
        .with_param("limit", 2_i64);
    let op = ParsedTemplateMap::resolve(&all, Some(Arc::clone(&tiers)), &compiler).unwrap();
    assert_eq!(op.get_as::<i64>("limit", 0).unwrap(), 1);
    assert_eq!(op.get_config_or("limit", 0_i64, 0).unwrap(), 1);

    let params_and_activity = RawOpTemplate::new("op").with_param("limit", 2_i64);
    let op =
        ParsedTemplateMap::resolve(&params_and_activity, Some(Arc::clone(&tiers)), &compiler).unwrap();
    assert_eq!(op.get_as::<i64>("limit", 0).unwrap(), 2);
    assert_eq!(op.get_config_or("limit", 0_i64, 0).unwrap(), 2);

    let activity_only = RawOpTemplate::new("op");
    let op = ParsedTemplateMap::resolve(&activity_only, Some(tiers), &compiler).unwrap();
    assert_eq!(op.get_as::<i64>("limit", 0).unwrap(), 3);
    assert_eq!(op.get_config_or("limit", 0_i64, 0).unwrap(), 3);

    let none = RawOpTemplate::new("op");
    let op = ParsedTemplateMap::resolve(&none, None, &compiler).unwrap();
    let err = op.get("limit", 0).unwrap_err();
    assert!(err.is_missing());
    let message = err.to_string();
    assert!(message.contains("'op'"), "{message}");
    assert!(message.contains("'limit'"), "{message}");
}

struct LiveSource(Mutex<String>);

impl ConfigSource for LiveSource {
    fn source_name(&self) -> &str {
        "activity params"
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        (name == "rate").then(|| Value::Text(self.0.lock().unwrap().clone()))
    }

    fn keys(&self) -> Vec<String> {
        vec!["rate".to_string()]
    }
}

#[test]
fn test_config_tier_reads_live_values() {
    let live = Arc::new(LiveSource(Mutex::new("10".to_string())));
    let source: Arc<dyn ConfigSource> = live.clone();
    let op = ParsedTemplateMap::resolve(&RawOpTemplate::new("op"), Some(source), &BindingCompiler::default())
        .unwrap();
    assert_eq!(op.get_static_config::<u64>("rate").unwrap(), 10);

    *live.0.lock().unwrap() = "20".to_string();
    assert_eq!(op.get_static_config::<u64>("rate").unwrap(), 20);

    *live.0.lock().unwrap() = "{r}".to_string();
    assert!(matches!(
        op.get_static_config::<u64>("rate"),
        Err(OpConfigError::DynamicConfig { tier: "activity params", .. })
    ));
}

#[test]
fn test_unquoted_bind_point_is_rejected() {
    let mut fields = IndexMap::new();
    let mut unquoted = IndexMap::new();
    unquoted.insert("userid".to_string(), Value::Null);
    fields.insert("key".to_string(), Value::Map(unquoted));
    let raw = RawOpTemplate::from_fields("op", fields)
        .unwrap()
        .with_binding("userid", "Identity()");

    let err = ParsedTemplateMap::resolve(&raw, None, &BindingCompiler::default()).unwrap_err();
    assert!(matches!(err, TemplateError::AmbiguousBindPoint { .. }));
    assert!(err.to_string().contains("\"{userid}\""), "{err}");
}

#[test]
fn test_compile_errors_surface_at_resolve() {
    let compiler = BindingCompiler::default();
    let unknown = RawOpTemplate::new("op").with_field("x", "{{Nope()}}");
    assert!(matches!(
        ParsedTemplateMap::resolve(&unknown, None, &compiler),
        Err(TemplateError::Binding { .. })
    ));

    let unresolved = RawOpTemplate::new("op").with_field("x", "{missing}");
    assert!(matches!(
        ParsedTemplateMap::resolve(&unresolved, None, &compiler),
        Err(TemplateError::UnresolvedBindPoint { .. })
    ));
}

fn leaf() -> impl Strategy<Value = (Value, bool)> {
    prop_oneof![
        any::<i64>().prop_map(|n| (Value::Long(n), false)),
        any::<bool>().prop_map(|b| (Value::Bool(b), false)),
        "[a-z ]{0,12}".prop_map(|s| (Value::Text(s), false)),
        Just((Value::from("{cycle}"), true)),
        Just((Value::from("v={{Mod(7)}}"), true)),
        Just((Value::from("{\"json\": 1}"), false)),
    ]
}

fn nested() -> impl Strategy<Value = (Value, bool)> {
    leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(|items| {
                let dynamic = items.iter().any(|(_, d)| *d);
                (Value::List(items.into_iter().map(|(v, _)| v).collect()), dynamic)
            }),
            prop::collection::vec(inner, 1..4).prop_map(|items| {
                let dynamic = items.iter().any(|(_, d)| *d);
                let map: IndexMap<String, Value> = items
                    .into_iter()
                    .enumerate()
                    .map(|(i, (v, _))| (format!("k{i}"), v))
                    .collect();
                (Value::Map(map), dynamic)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn prop_classification_follows_bind_points((value, dynamic) in nested()) {
        let compiler = BindingCompiler::default();
        let bindings = IndexMap::from([("cycle".to_string(), "Identity()".to_string())]);

        let mut parser = FieldParser::new("op", &bindings, &compiler);
        let first = parser.parse("f", &value).unwrap();
        let mut parser = FieldParser::new("op", &bindings, &compiler);
        let second = parser.parse("f", &value).unwrap();

        prop_assert_eq!(first.is_dynamic(), dynamic);
        prop_assert_eq!(second.is_dynamic(), dynamic);
        if let FieldTemplate::Static(stored) = first {
            prop_assert_eq!(stored, value);
        }
    }

    #[test]
    fn prop_dynamic_fields_are_deterministic(cycle in any::<i64>()) {
        let raw = RawOpTemplate::new("op")
            .with_field("a", "x-{cycle}-{{Hash(); Mod(100)}}")
            .with_field("b", vec![Value::from("{cycle}"), Value::Long(1)])
            .with_binding("cycle", "Identity()");
        let compiler = BindingCompiler::default();
        let first = ParsedTemplateMap::resolve(&raw, None, &compiler).unwrap();
        let second = ParsedTemplateMap::resolve(&raw, None, &BindingCompiler::default()).unwrap();
        prop_assert_eq!(first.apply(cycle).unwrap(), second.apply(cycle).unwrap());
    }
}
