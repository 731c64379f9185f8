//! JSON canónico: claves de objetos ordenadas, sin espacios.
//!
//! Dos valores iguales producen siempre el mismo string sin importar el orden
//! de inserción de sus claves.

use serde_json::Value;
use std::collections::BTreeMap;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let tree: BTreeMap<&String, String> = map.iter().map(|(k, v)| (k, to_canonical_json(v))).collect();
            let items: Vec<String> = tree.into_iter().map(|(k, v)| format!("{}:{}", quote(k), v)).collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

fn quote(s: &str) -> String {
    // Serializar un &str a JSON no puede fallar.
    serde_json::to_string(s).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted() {
        let a = json!({"b": 1, "a": [true, null, "x"]});
        assert_eq!(to_canonical_json(&a), r#"{"a":[true,null,"x"],"b":1}"#);
    }
}
