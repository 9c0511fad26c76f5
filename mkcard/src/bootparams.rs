//! Kernel command-line assembly.
//!
//! The bootloader reads a single-line parameter file from the boot
//! partition. Parameters are an ordered mapping from name to optional value;
//! a missing value marks a bare flag. Serialization emits all `key=value`
//! tokens first and all flags second; consumers parse the line positionally,
//! so that ordering is part of the format.

/// Ordered kernel parameter set.
///
/// Overlaying overrides never mutates the base, so one declared base can be
/// rendered repeatedly with different override sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelParamSet {
    entries: Vec<(String, Option<String>)>,
}

impl KernelParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set a parameter. An existing key keeps its position and gets the new
    /// value; a new key is appended.
    pub fn set(&mut self, name: &str, value: Option<&str>) {
        let value = value.map(str::to_string);
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_deref())
    }

    /// Parse command-line tokens: `key=value` pairs and bare flags. Order is
    /// preserved; an empty value (`key=`) counts as a flag.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for token in tokens {
            let token = token.as_ref();
            match token.split_once('=') {
                Some((key, value)) if !value.is_empty() => set.set(key, Some(value)),
                Some((key, _)) => set.set(key, None),
                None => set.set(token, None),
            }
        }
        set
    }

    /// Merge `overrides` over a copy of `self`: replaced keys keep their
    /// original position, new keys go last. Returns the merged set; `self`
    /// is untouched.
    pub fn overlay(&self, overrides: &KernelParamSet) -> KernelParamSet {
        let mut merged = self.clone();
        for (key, value) in &overrides.entries {
            merged.set(key, value.as_deref());
        }
        merged
    }

    /// Serialize to the single-line format: value-bearing parameters first,
    /// bare flags second, each group in set order, joined by single spaces.
    pub fn render(&self) -> String {
        let mut tokens: Vec<String> = self
            .entries
            .iter()
            .filter_map(|(k, v)| match v.as_deref() {
                Some(value) if !value.is_empty() => Some(format!("{}={}", k, value)),
                _ => None,
            })
            .collect();
        tokens.extend(self.entries.iter().filter_map(|(k, v)| {
            match v.as_deref() {
                Some(value) if !value.is_empty() => None,
                _ => Some(k.clone()),
            }
        }));
        tokens.join(" ")
    }
}

/// Render a command line from a base profile and optional overrides.
pub fn render_cmdline(base: &KernelParamSet, overrides: Option<&KernelParamSet>) -> String {
    match overrides {
        Some(overrides) => base.overlay(overrides).render(),
        None => base.render(),
    }
}
