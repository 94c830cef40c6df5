use std::collections::BTreeMap;

/// Structured command-line for an automation tool invocation.
///
/// Assembly order is deterministic: `[operation, args..., flags...,
/// positional-input?]`. Key/value arguments are rendered as `-key=value`.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    operation: String,
    args: ArgStore,
    flags: Vec<String>,
    input: Option<String>,
}

/// Key/value argument storage, selected by construction mode.
#[derive(Debug, Clone)]
enum ArgStore {
    /// Keeps insertion order and repeated keys. Used for tools that accept
    /// the same flag multiple times (e.g. repeated path filters).
    Ordered(Vec<(String, String)>),
    /// Last write wins; keys are emitted in lexicographic order so the
    /// assembled command-line is reproducible.
    Unique(BTreeMap<String, String>),
}

impl CommandSpec {
    /// A command that preserves duplicate keys in insertion order.
    pub fn allow_duplicates(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            args: ArgStore::Ordered(Vec::new()),
            flags: Vec::new(),
            input: None,
        }
    }

    /// A command that deduplicates keys, last write wins.
    pub fn dedupe(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            args: ArgStore::Unique(BTreeMap::new()),
            flags: Vec::new(),
            input: None,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn arg(mut self, key: &str, value: &str) -> Self {
        match &mut self.args {
            ArgStore::Ordered(args) => args.push((key.to_string(), value.to_string())),
            ArgStore::Unique(args) => {
                args.insert(key.to_string(), value.to_string());
            }
        }
        self
    }

    pub fn args<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            self = self.arg(key.as_ref(), value.as_ref());
        }
        self
    }

    /// A standalone flag, emitted verbatim after the key/value arguments.
    pub fn flag(mut self, flag: &str) -> Self {
        self.flags.push(flag.to_string());
        self
    }

    /// Trailing positional input, emitted last.
    pub fn input(mut self, input: &str) -> Self {
        self.input = Some(input.to_string());
        self
    }

    /// Assemble the final argument vector.
    pub fn build(&self) -> Vec<String> {
        let mut out = vec![self.operation.clone()];
        match &self.args {
            ArgStore::Ordered(args) => {
                out.extend(args.iter().map(|(k, v)| format!("-{k}={v}")));
            }
            ArgStore::Unique(args) => {
                out.extend(args.iter().map(|(k, v)| format!("-{k}={v}")));
            }
        }
        out.extend(self.flags.iter().cloned());
        if let Some(input) = &self.input {
            out.push(input.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembly_order() {
        let spec = CommandSpec::allow_duplicates("plan")
            .arg("out", "plan.bin")
            .flag("-no-color")
            .input("module/");

        assert_eq!(spec.build(), vec!["plan", "-out=plan.bin", "-no-color", "module/"]);
    }

    #[test]
    fn test_allow_duplicates_keeps_order_and_repeats() {
        let spec = CommandSpec::allow_duplicates("plan")
            .arg("target", "module.a")
            .arg("var", "x=1")
            .arg("target", "module.b");

        assert_eq!(
            spec.build(),
            vec!["plan", "-target=module.a", "-var=x=1", "-target=module.b"]
        );
    }

    #[test]
    fn test_dedupe_last_write_wins_lexicographic() {
        let spec = CommandSpec::dedupe("apply")
            .arg("refresh", "true")
            .arg("lock-timeout", "10s")
            .arg("refresh", "false");

        assert_eq!(spec.build(), vec!["apply", "-lock-timeout=10s", "-refresh=false"]);
    }

    #[test]
    fn test_flags_without_args() {
        let spec = CommandSpec::dedupe("init").flag("-input=false").flag("-no-color");
        assert_eq!(spec.build(), vec!["init", "-input=false", "-no-color"]);
    }

    #[test]
    fn test_args_bulk_insert() {
        let spec = CommandSpec::allow_duplicates("plan").args([("a", "1"), ("b", "2")]);
        assert_eq!(spec.build(), vec!["plan", "-a=1", "-b=2"]);
    }
}
