//! Rule-file loader.
//!
//! The rule file is line-oriented. `:group` lines declare palette groups
//! and their dependencies; pattern lines map texture or scene names to
//! attributes:
//!
//! ```text
//! # comment
//! :group world dir maps/world depends base
//! brick-*   : margin=2 group=world
//! *_face    : omit=true
//! sky       : repeat=300 size=256x256
//! ```
//!
//! Merging policy: the last matching line wins per attribute; `group`
//! attributes union across all matching lines. Any syntactic problem or
//! unknown attribute name fails the load with `BadRule` naming the file
//! and line.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use globset::{Glob, GlobMatcher};

use crate::error::{PalError, Result};

/// A group declaration (`:group NAME [dir DIR] [depends A,B,...]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDecl {
    pub name: String,
    pub dirname: String,
    pub depends: Vec<String>,
}

/// One attribute assignment on a pattern line.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAttr {
    Margin(u32),
    RepeatThresholdPct(f64),
    Omit(bool),
    Group(String),
    SizeHint(u32, u32),
}

/// One pattern line.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: String,
    matcher: GlobMatcher,
    pub attrs: Vec<RuleAttr>,
}

impl Rule {
    pub fn matches(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }
}

/// The merged attribute set for one name, after applying every matching
/// pattern line in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchedAttrs {
    pub margin: Option<u32>,
    pub repeat_threshold_pct: Option<f64>,
    pub omit: Option<bool>,
    pub size_hint: Option<(u32, u32)>,
    pub groups: BTreeSet<String>,
}

/// A parsed rule file.
#[derive(Debug, Clone, Default)]
pub struct RuleFile {
    pub groups: Vec<GroupDecl>,
    pub rules: Vec<Rule>,
}

impl RuleFile {
    pub fn load(path: &Path) -> Result<RuleFile> {
        let text = fs::read_to_string(path).map_err(|e| PalError::BadRule {
            file: path.to_path_buf(),
            line: 0,
            message: format!("cannot read rule file: {e}"),
        })?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<RuleFile> {
        let mut out = RuleFile::default();
        for (lineno, raw) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix(":group") {
                out.parse_group_line(path, lineno, rest.trim())?;
            } else {
                out.parse_pattern_line(path, lineno, line)?;
            }
        }
        Ok(out)
    }

    fn parse_group_line(&mut self, path: &Path, lineno: usize, rest: &str) -> Result<()> {
        let bad = |message: String| PalError::BadRule {
            file: path.to_path_buf(),
            line: lineno,
            message,
        };

        let mut words = rest.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| bad("missing group name after :group".into()))?
            .to_string();
        let mut decl = GroupDecl {
            name,
            dirname: String::new(),
            depends: Vec::new(),
        };
        while let Some(word) = words.next() {
            match word {
                "dir" => {
                    decl.dirname = words
                        .next()
                        .ok_or_else(|| bad("missing directory after 'dir'".into()))?
                        .to_string();
                }
                "depends" => {
                    let list = words
                        .next()
                        .ok_or_else(|| bad("missing group list after 'depends'".into()))?;
                    for dep in list.split(',') {
                        if dep.is_empty() {
                            return Err(bad("empty name in depends list".into()));
                        }
                        decl.depends.push(dep.to_string());
                    }
                }
                other => {
                    return Err(bad(format!("unknown group keyword '{other}'")));
                }
            }
        }
        if self.groups.iter().any(|g| g.name == decl.name) {
            return Err(bad(format!("group '{}' declared twice", decl.name)));
        }
        self.groups.push(decl);
        Ok(())
    }

    fn parse_pattern_line(&mut self, path: &Path, lineno: usize, line: &str) -> Result<()> {
        let bad = |message: String| PalError::BadRule {
            file: path.to_path_buf(),
            line: lineno,
            message,
        };

        let (pattern, attrs_text) = line
            .split_once(':')
            .ok_or_else(|| bad("expected 'PATTERN : attr=val ...'".into()))?;
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(bad("empty pattern".into()));
        }
        let matcher = Glob::new(pattern)
            .map_err(|e| bad(format!("bad pattern '{pattern}': {e}")))?
            .compile_matcher();

        let mut attrs = Vec::new();
        for word in attrs_text.split_whitespace() {
            let (key, val) = word
                .split_once('=')
                .ok_or_else(|| bad(format!("expected attr=val, got '{word}'")))?;
            let attr = match key {
                "margin" => RuleAttr::Margin(
                    val.parse()
                        .map_err(|_| bad(format!("bad margin '{val}'")))?,
                ),
                "repeat" => RuleAttr::RepeatThresholdPct(
                    val.parse()
                        .map_err(|_| bad(format!("bad repeat threshold '{val}'")))?,
                ),
                "omit" => RuleAttr::Omit(match val {
                    "true" | "yes" | "1" => true,
                    "false" | "no" | "0" => false,
                    _ => return Err(bad(format!("bad omit flag '{val}'"))),
                }),
                "group" => {
                    if val.is_empty() {
                        return Err(bad("empty group name".into()));
                    }
                    RuleAttr::Group(val.to_string())
                }
                "size" => {
                    let (w, h) = val
                        .split_once('x')
                        .ok_or_else(|| bad(format!("bad size '{val}', expected WxH")))?;
                    let w = w.parse().map_err(|_| bad(format!("bad size '{val}'")))?;
                    let h = h.parse().map_err(|_| bad(format!("bad size '{val}'")))?;
                    RuleAttr::SizeHint(w, h)
                }
                other => {
                    return Err(bad(format!("unknown attribute '{other}'")));
                }
            };
            attrs.push(attr);
        }
        if attrs.is_empty() {
            return Err(bad("pattern line with no attributes".into()));
        }

        self.rules.push(Rule {
            pattern: pattern.to_string(),
            matcher,
            attrs,
        });
        Ok(())
    }

    /// Applies every matching pattern line to `name`, in file order.
    pub fn matched_attrs(&self, name: &str) -> MatchedAttrs {
        let mut out = MatchedAttrs::default();
        for rule in &self.rules {
            if !rule.matches(name) {
                continue;
            }
            for attr in &rule.attrs {
                match attr {
                    RuleAttr::Margin(v) => out.margin = Some(*v),
                    RuleAttr::RepeatThresholdPct(v) => out.repeat_threshold_pct = Some(*v),
                    RuleAttr::Omit(v) => out.omit = Some(*v),
                    RuleAttr::SizeHint(w, h) => out.size_hint = Some((*w, *h)),
                    RuleAttr::Group(g) => {
                        out.groups.insert(g.clone());
                    }
                }
            }
        }
        out
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(text: &str) -> Result<RuleFile> {
        RuleFile::parse(&PathBuf::from("test.txa"), text)
    }

    #[test]
    fn last_match_wins_but_groups_union() {
        let rules = parse(
            ":group world\n\
             :group char depends world\n\
             brick-* : margin=2 group=world\n\
             brick-red : margin=4 group=char\n",
        )
        .unwrap();

        let m = rules.matched_attrs("brick-red");
        assert_eq!(m.margin, Some(4));
        assert_eq!(
            m.groups.iter().cloned().collect::<Vec<_>>(),
            vec!["char".to_string(), "world".to_string()]
        );

        let m2 = rules.matched_attrs("brick-blue");
        assert_eq!(m2.margin, Some(2));
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let err = parse("foo : shiny=1\n").unwrap_err();
        match err {
            PalError::BadRule { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("shiny"));
            }
            other => panic!("expected BadRule, got {other:?}"),
        }
    }

    #[test]
    fn comments_and_blanks_are_ignored() {
        let rules = parse("# header\n\n  # indented comment\nfoo : omit=true # trailing\n").unwrap();
        assert_eq!(rules.rules.len(), 1);
        assert_eq!(rules.matched_attrs("foo").omit, Some(true));
    }

    #[test]
    fn group_line_parses_dir_and_depends() {
        let rules = parse(":group world dir maps/world depends base,shared\n").unwrap();
        assert_eq!(
            rules.groups,
            vec![GroupDecl {
                name: "world".into(),
                dirname: "maps/world".into(),
                depends: vec!["base".into(), "shared".into()],
            }]
        );
    }
}
