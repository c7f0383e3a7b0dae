//! Macro table (§3 component C8): a name→value mapping parsed from a
//! comma-separated string, consulted at startup to override runtime
//! options and to resolve `{name}` placeholders in channel PV names.
//!
//! Grounded on `examples/original_source/src/seq/seq_mac.c`
//! (`seqMacParse`/`seqMacValGet`/`seqMacEval`): `seqMacParse` looks up an
//! existing slot for a name and *replaces* its value rather than
//! appending a duplicate, so calling `parse` twice for the same name is a
//! last-write-wins update. Combined with §4.7's "parse the
//! program-embedded macro string, then the caller-supplied macro string",
//! this is what makes "caller wins on conflict" true: the caller's
//! `parse()` call runs second and overwrites whatever the program default
//! set.

/// `(name, value)` pairs; lookup is linear, first match wins.
#[derive(Debug, Default, Clone)]
pub struct MacroTable {
    entries: Vec<(String, String)>,
}

impl MacroTable {
    pub fn new() -> Self {
        MacroTable::default()
    }

    /// Parses a comma-separated `name=value,name2=value2,bare` string (a
    /// macro with no `=value` is recorded with an empty value, matching
    /// `seqMacParse`'s tolerance of bare names) and appends its entries.
    /// Program-embedded macros should be parsed before caller-supplied
    /// ones so that, per §4.7, "caller wins on conflict" (first match
    /// wins on lookup).
    pub fn parse(&mut self, s: &str) {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, value) = match part.split_once('=') {
                Some((name, value)) => (name.trim(), value.trim().to_string()),
                None => (part, String::new()),
            };
            if !is_valid_name(name) {
                continue;
            }
            self.set(name, value);
        }
    }

    /// Inserts or overwrites the value for `name` (`seqMacTblGet` +
    /// in-place replace in the original).
    fn set(&mut self, name: &str, value: String) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// `seqMacValGet` — first matching value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// `seqMacEval` — substitutes every `{name}` occurrence in `input`
    /// with its macro value; an unresolved name is left as-is (the
    /// original leaves the substitution empty; this is one of the few
    /// places we intentionally diverge — see `DESIGN.md`).
    pub fn eval(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut name = String::new();
                let mut closed = false;
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c2);
                }
                if closed {
                    match self.get(&name) {
                        Some(v) => out.push_str(v),
                        None => {
                            out.push('{');
                            out.push_str(&name);
                            out.push('}');
                        }
                    }
                } else {
                    out.push('{');
                    out.push_str(&name);
                }
            } else {
                out.push(c);
            }
        }
        out
    }
}

fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_lookup() {
        let mut mt = MacroTable::new();
        mt.parse("P=XF:OP, N = 3 ,bare");
        assert_eq!(mt.get("P"), Some("XF:OP"));
        assert_eq!(mt.get("N"), Some("3"));
        assert_eq!(mt.get("bare"), Some(""));
        assert_eq!(mt.get("missing"), None);
    }

    #[test]
    fn caller_wins_on_conflict() {
        let mut mt = MacroTable::new();
        mt.parse("P=program-default"); // parsed first, per §4.7
        mt.parse("P=caller-override"); // caller string parsed second, wins
        assert_eq!(mt.get("P"), Some("caller-override"));
    }

    #[test]
    fn eval_substitutes_braces() {
        let mut mt = MacroTable::new();
        mt.parse("P=XF:OP,N=3");
        assert_eq!(mt.eval("{P}motor{N}"), "XF:OPmotor3");
        assert_eq!(mt.eval("{unknown}"), "{unknown}");
    }
}
