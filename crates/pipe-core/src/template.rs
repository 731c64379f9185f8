//! Plantillas de argumentos.
//!
//! Sintaxis: `${nombre}` se reemplaza por la ubicación del artifact con ese
//! nombre lógico o por una variable del run (`run_dir`, `run_id`,
//! `iteration`, `out`). `$$` produce un `$` literal; un `$` que no va seguido
//! de `{` o `$` se deja tal cual, así los scripts `sh -c '... $1'` no
//! necesitan escape.

use crate::errors::CoreEngineError;

/// Directorio del namespace de la iteración.
pub const RUN_DIR: &str = "run_dir";
pub const RUN_ID: &str = "run_id";
pub const ITERATION: &str = "iteration";
/// Ubicación resuelta de la salida declarada del stage.
pub const OUT: &str = "out";

pub const BUILTINS: [&str; 4] = [RUN_DIR, RUN_ID, ITERATION, OUT];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

fn parse(template: &str) -> Result<Vec<Segment>, CoreEngineError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            literal.push(c);
            continue;
        }
        match chars.peek().map(|(_, n)| *n) {
            Some('$') => {
                chars.next();
                literal.push('$');
            }
            Some('{') => {
                let rest = &template[i + 2..];
                let end = rest.find('}')
                              .ok_or_else(|| CoreEngineError::ConfigLoadFailure(format!("unterminated placeholder in '{template}'")))?;
                let name = rest[..end].trim();
                if name.is_empty() {
                    return Err(CoreEngineError::ConfigLoadFailure(format!("empty placeholder in '{template}'")));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name.to_string()));
                // consumir '{' + nombre + '}'
                let consumed = rest[..=end].chars().count() + 1;
                for _ in 0..consumed {
                    chars.next();
                }
            }
            _ => literal.push('$'),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Nombres referenciados por la plantilla, en orden de aparición.
pub fn placeholders(template: &str) -> Result<Vec<String>, CoreEngineError> {
    Ok(parse(template)?.into_iter()
                       .filter_map(|s| match s {
                           Segment::Placeholder(n) => Some(n),
                           Segment::Literal(_) => None,
                       })
                       .collect())
}

/// Sustituye cada placeholder usando `lookup`. Un nombre sin valor es
/// `UpstreamArtifactMissing`.
pub fn render<F>(template: &str, lookup: F) -> Result<String, CoreEngineError>
    where F: Fn(&str) -> Option<String>
{
    let mut out = String::with_capacity(template.len());
    for seg in parse(template)? {
        match seg {
            Segment::Literal(l) => out.push_str(&l),
            Segment::Placeholder(name) => {
                let value = lookup(&name).ok_or_else(|| CoreEngineError::UpstreamArtifactMissing(name.clone()))?;
                out.push_str(&value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "events" => Some("/w/r/iter-0/events.lhe".into()),
            "out" => Some("/w/r/iter-0/p.csv".into()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_names() {
        assert_eq!(render("${events}", lookup).unwrap(), "/w/r/iter-0/events.lhe");
        assert_eq!(render("--in=${events} --out=${ out }", lookup).unwrap(),
                   "--in=/w/r/iter-0/events.lhe --out=/w/r/iter-0/p.csv");
    }

    #[test]
    fn dollar_handling() {
        assert_eq!(render("echo $1 $$HOME", lookup).unwrap(), "echo $1 $HOME");
        assert_eq!(placeholders("cat ${a} > ${b}").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn unknown_name_is_upstream_missing() {
        let err = render("${nope}", lookup).unwrap_err();
        assert_eq!(err, CoreEngineError::UpstreamArtifactMissing("nope".into()));
    }

    #[test]
    fn unterminated_is_config_error() {
        assert!(matches!(placeholders("${abc"), Err(CoreEngineError::ConfigLoadFailure(_))));
        assert!(matches!(placeholders("${}"), Err(CoreEngineError::ConfigLoadFailure(_))));
    }

    proptest! {
        #[test]
        fn text_without_dollar_is_unchanged(s in "[^$]*") {
            prop_assert_eq!(render(&s, lookup).unwrap(), s.clone());
            prop_assert!(placeholders(&s).unwrap().is_empty());
        }
    }
}
