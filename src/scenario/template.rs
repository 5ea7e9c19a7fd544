//! `${name}` substitution for scenario strings

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use regex::{Captures, Regex};

use crate::common::{Error, Result};

fn var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid variable regex"))
}

/// Variables shared by the steps of one journey
#[derive(Debug, Clone, Default)]
pub struct Vars {
    inner: Arc<Mutex<BTreeMap<String, String>>>,
}

impl Vars {
    pub fn new(initial: BTreeMap<String, String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(name.into(), value.into());
    }

    /// Replace every `${name}`; an undefined name is an error
    pub fn render(&self, template: &str) -> Result<String> {
        let vars = self.lock();
        let mut missing = None;
        let rendered = var_re().replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match vars.get(name) {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(Error::Scenario(format!("undefined variable '${{{name}}}'"))),
            None => Ok(rendered.into_owned()),
        }
    }

    pub fn render_opt(&self, template: Option<&str>) -> Result<Option<String>> {
        template.map(|t| self.render(t)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vars {
        Vars::new(BTreeMap::from([
            ("host".to_string(), "api.test".to_string()),
            ("id".to_string(), "42".to_string()),
        ]))
    }

    #[test]
    fn test_render() {
        let v = vars();
        assert_eq!(v.render("https://${host}/jobs/${id}").unwrap(), "https://api.test/jobs/42");
        assert_eq!(v.render("no vars, $5 and {x}").unwrap(), "no vars, $5 and {x}");
    }

    #[test]
    fn test_undefined_variable() {
        let err = vars().render("${nope}").unwrap_err();
        assert!(err.to_string().contains("${nope}"));
    }

    #[test]
    fn test_set_is_shared_between_clones() {
        let v = vars();
        let other = v.clone();
        other.set("token", "abc");
        assert_eq!(v.render("${token}").unwrap(), "abc");
    }
}
