use std::collections::BTreeMap;

/// Short names accepted by `--model`.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("v3.1", "deepseek-v3.1"),
    ("r1", "deepseek-r1"),
    ("q3m", "qwen3-max"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAliases {
    map: BTreeMap<String, String>,
}

impl Default for ModelAliases {
    fn default() -> Self {
        Self::with_overrides(None)
    }
}

impl ModelAliases {
    pub fn with_overrides(extra: Option<&BTreeMap<String, String>>) -> Self {
        let mut map: BTreeMap<String, String> = BUILTIN_ALIASES
            .iter()
            .map(|(alias, model)| (alias.to_string(), model.to_string()))
            .collect();
        if let Some(extra) = extra {
            map.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Self { map }
    }

    /// Unknown names are assumed to be real model names.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.map.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Print the alias table.
pub fn write_table(out: &mut dyn std::io::Write, aliases: &ModelAliases) -> std::io::Result<()> {
    let width = aliases
        .iter()
        .map(|(alias, _)| alias.chars().count())
        .max()
        .unwrap_or(0)
        .max("ALIAS".len());

    writeln!(out, "{:<width$}  MODEL", "ALIAS")?;
    for (alias, model) in aliases.iter() {
        writeln!(out, "{alias:<width$}  {model}")?;
    }
    Ok(())
}
