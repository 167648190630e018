//! Host-provided packages
//!
//! | Path            | Members                              |
//! |-----------------|--------------------------------------|
//! | `os`            | `Stdin`, `Stdout`, `Stderr`          |
//! | `fmt`           | `Println`, `Fprintln`, `Sprint`      |
//! | `encoding/json` | `Marshal`, `Unmarshal`               |
//!
//! Output written through `fmt` (and `fmt.Fprintln(os.Stdout, ...)`) goes to
//! the calling machine's sink, so harness output capture sees it.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::{Package, ResolveError, Resolver, Store};
use crate::machine::{Fault, Key, NativeFunc, Stream, Value};

static NATIVE_PACKAGES: Lazy<HashMap<&'static str, Arc<Package>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "os",
        Arc::new(Package::native(
            "os",
            [
                ("Stdin", Value::Stream(Stream::Stdin)),
                ("Stdout", Value::Stream(Stream::Stdout)),
                ("Stderr", Value::Stream(Stream::Stderr)),
            ],
        )),
    );
    m.insert(
        "fmt",
        Arc::new(Package::native(
            "fmt",
            [
                native("Println", "fmt.Println", fmt_println),
                native("Fprintln", "fmt.Fprintln", fmt_fprintln),
                native("Sprint", "fmt.Sprint", fmt_sprint),
            ],
        )),
    );
    m.insert(
        "encoding/json",
        Arc::new(Package::native(
            "encoding/json",
            [
                native("Marshal", "json.Marshal", json_marshal),
                native("Unmarshal", "json.Unmarshal", json_unmarshal),
            ],
        )),
    );
    m
});

fn native(
    member: &'static str,
    name: &'static str,
    func: fn(&mut dyn Write, Vec<Value>) -> Result<Value, Fault>,
) -> (&'static str, Value) {
    (member, Value::Native(NativeFunc { name, func }))
}

/// Lookup in the static registry of host packages
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeResolver;

impl NativeResolver {
    pub fn new() -> Self {
        Self
    }

    /// Every native import path, sorted
    pub fn paths() -> Vec<&'static str> {
        let mut paths: Vec<_> = NATIVE_PACKAGES.keys().copied().collect();
        paths.sort_unstable();
        paths
    }
}

impl Resolver for NativeResolver {
    fn name(&self) -> &str {
        "native"
    }

    fn resolve(&self, path: &str, _store: &Store) -> Result<Option<Arc<Package>>, ResolveError> {
        Ok(NATIVE_PACKAGES.get(path).cloned())
    }
}

// =============================================================================
// fmt
// =============================================================================

fn join_display(args: &[Value]) -> String {
    args.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_line(out: &mut dyn Write, text: &str) -> Result<(), Fault> {
    writeln!(out, "{}", text).map_err(|e| Fault::Panic(format!("fmt: {}", e)))
}

fn fmt_println(out: &mut dyn Write, args: Vec<Value>) -> Result<Value, Fault> {
    write_line(out, &join_display(&args))?;
    Ok(Value::Nil)
}

fn fmt_fprintln(out: &mut dyn Write, args: Vec<Value>) -> Result<Value, Fault> {
    let Some((target, rest)) = args.split_first() else {
        return Err(Fault::arg_count("fmt.Fprintln", 1, 0));
    };
    let text = join_display(rest);
    match target {
        Value::Stream(Stream::Stdout) => write_line(out, &text)?,
        Value::Stream(Stream::Stderr) => write_line(&mut std::io::stderr(), &text)?,
        other => return Err(Fault::type_mismatch("fmt.Fprintln", "os.Stdout or os.Stderr", other)),
    }
    Ok(Value::Nil)
}

fn fmt_sprint(_out: &mut dyn Write, args: Vec<Value>) -> Result<Value, Fault> {
    Ok(Value::Str(args.iter().map(|v| v.to_string()).collect()))
}

// =============================================================================
// encoding/json
// =============================================================================

fn to_json(value: &Value) -> Result<serde_json::Value, Fault> {
    Ok(match value {
        Value::Nil => serde_json::Value::Null,
        Value::Int(v) => serde_json::Value::from(*v),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(
            items.iter().map(to_json).collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => {
            let mut object = serde_json::Map::new();
            for (k, v) in entries.iter() {
                object.insert(k.to_string(), to_json(v)?);
            }
            serde_json::Value::Object(object)
        }
        other => {
            return Err(Fault::Panic(format!(
                "json: unsupported type: {}",
                other.type_name()
            )))
        }
    })
}

fn from_json(value: serde_json::Value) -> Result<Value, Fault> {
    Ok(match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(v) => Value::Int(v),
            None => return Err(Fault::Panic(format!("json: cannot represent number {}", n))),
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::list(
            items
                .into_iter()
                .map(from_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_json::Value::Object(object) => {
            let mut entries = BTreeMap::new();
            for (k, v) in object {
                entries.insert(Key::Str(k), from_json(v)?);
            }
            Value::map(entries)
        }
    })
}

fn json_marshal(_out: &mut dyn Write, args: Vec<Value>) -> Result<Value, Fault> {
    let [value] = <[Value; 1]>::try_from(args)
        .map_err(|args| Fault::arg_count("json.Marshal", 1, args.len()))?;
    let json = to_json(&value)?;
    serde_json::to_string(&json)
        .map(Value::Str)
        .map_err(|e| Fault::Panic(format!("json: {}", e)))
}

fn json_unmarshal(_out: &mut dyn Write, args: Vec<Value>) -> Result<Value, Fault> {
    let [value] = <[Value; 1]>::try_from(args)
        .map_err(|args| Fault::arg_count("json.Unmarshal", 1, args.len()))?;
    let text = match value {
        Value::Str(text) => text,
        other => return Err(Fault::type_mismatch("json.Unmarshal", "string", &other)),
    };
    let json: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| Fault::Panic(format!("json: {}", e)))?;
    from_json(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResolverChain;

    #[test]
    fn test_registry_paths() {
        assert_eq!(NativeResolver::paths(), vec!["encoding/json", "fmt", "os"]);
    }

    #[test]
    fn test_unknown_path_is_not_native() {
        let store = Store::new(ResolverChain::empty());
        assert!(NativeResolver.resolve("strings", &store).unwrap().is_none());
    }

    #[test]
    fn test_println_writes_to_sink() {
        let mut out = Vec::new();
        fmt_println(&mut out, vec![Value::str("a"), Value::Int(1)]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a 1\n");
    }

    #[test]
    fn test_json_roundtrip() {
        let mut sink = std::io::sink();
        let parsed = json_unmarshal(&mut sink, vec![Value::str(r#"{"b":[1,true],"a":null}"#)]).unwrap();
        assert_eq!(parsed.to_string(), "map[a:<nil> b:[1 true]]");
        let encoded = json_marshal(&mut sink, vec![parsed]).unwrap();
        assert_eq!(encoded.to_string(), r#"{"a":null,"b":[1,true]}"#);
    }

    #[test]
    fn test_json_rejects_functions() {
        let mut sink = std::io::sink();
        let f = NATIVE_PACKAGES["fmt"].member("Println").cloned().unwrap();
        assert!(matches!(json_marshal(&mut sink, vec![f]), Err(Fault::Panic(_))));
    }
}
