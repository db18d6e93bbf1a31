//! 3-tier command security classifier.
//!
//! The classifier resolves a shell command string to a [`SecurityLevel`]
//! using tiered rule matching:
//!
//! | Tier | Checked | Technique |
//! |------|---------|-----------|
//! | 1 | Dangerous | [`aho_corasick`] substrings + first-token programs + [`regex`] |
//! | 2 | Moderate | same |
//! | 3 | Safe | same |
//!
//! Tiers are tested most-restrictive-first and the first match wins, so a
//! command that looks both dangerous and routine is dangerous. A command
//! that matches nothing is **dangerous**: the classifier fails closed, and
//! only commands affirmatively recognized as harmless clear the gate
//! without review.
//!
//! Classification is deterministic and total. Input is normalized first
//! (trim, collapse internal whitespace, lowercase), so `"  RM   -RF  / "`
//! and `"rm -rf /"` classify identically.
//!
//! Rules are compiled once at build time; the classifier itself is immutable
//! and cheap to share. Deployments extend the built-in rule set through
//! [`ClassifierBuilder`].

use aho_corasick::AhoCorasick;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};

// ---------------------------------------------------------------------------
// Security levels
// ---------------------------------------------------------------------------

/// How much scrutiny a command deserves before it runs.
///
/// Ordered by severity: `Dangerous > Moderate > Safe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Read-only or otherwise harmless; runs without review.
    Safe = 0,

    /// Mutates state in routine, recoverable ways; runs without review.
    Moderate = 1,

    /// Destructive or privileged; parked until a human approves it.
    Dangerous = 2,
}

impl SecurityLevel {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Moderate => "moderate",
            Self::Dangerous => "dangerous",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(Self::Safe),
            "moderate" => Some(Self::Moderate),
            "dangerous" => Some(Self::Dangerous),
            _ => None,
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Built-in rules
// ---------------------------------------------------------------------------

const DANGEROUS_PHRASES: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "mkfs",
    "dd if=",
    "of=/dev/",
    ":(){",
    "drop table",
    "drop database",
    "truncate table",
];

const DANGEROUS_PATTERNS: &[&str] = &[
    r"^sudo\s+rm\b",
    r"\bchmod\s+(-r\s+)?777\s+/",
    r"(curl|wget)[^|]*\|\s*(ba|z)?sh",
    r">\s*/dev/sd[a-z]",
];

const DANGEROUS_PROGRAMS: &[&str] = &["shutdown", "reboot", "poweroff", "halt", "fdisk", "parted"];

const MODERATE_PHRASES: &[&str] = &[];

const MODERATE_PATTERNS: &[&str] = &[r"\bgit\s+(push|reset|rebase|clean)\b", r">{1,2}\s*\S"];

const MODERATE_PROGRAMS: &[&str] = &[
    "rm",
    "mv",
    "cp",
    "chmod",
    "chown",
    "kill",
    "pkill",
    "sudo",
    "systemctl",
    "service",
    "apt",
    "apt-get",
    "yum",
    "dnf",
    "brew",
    "npm",
    "pip",
    "docker",
    "make",
];

const SAFE_PHRASES: &[&str] = &["--help", "--version"];

const SAFE_PATTERNS: &[&str] = &[r"^git\s+(status|log|diff|show|branch)\b"];

const SAFE_PROGRAMS: &[&str] = &[
    "ls", "cat", "echo", "pwd", "whoami", "date", "uptime", "df", "du", "free", "ps", "head",
    "tail", "grep", "find", "wc", "which", "env", "printenv", "uname", "hostname", "id",
];

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// One compiled rule tier.
#[derive(Debug)]
struct Tier {
    level: SecurityLevel,
    /// Substring phrases, `None` when the tier has no phrases.
    automaton: Option<AhoCorasick>,
    /// Program names matched against the command's first token.
    programs: Vec<String>,
    patterns: Vec<Regex>,
}

impl Tier {
    fn matches(&self, command: &str) -> bool {
        if self
            .automaton
            .as_ref()
            .is_some_and(|ac| ac.is_match(command))
        {
            return true;
        }
        if let Some(program) = command.split_whitespace().next() {
            if self.programs.iter().any(|p| p == program) {
                return true;
            }
        }
        self.patterns.iter().any(|re| re.is_match(command))
    }
}

/// Deterministic command-to-security-level classifier.
///
/// Built once via [`ClassifierBuilder`]; immutable afterwards. Wrap in `Arc`
/// if shared access is needed.
#[derive(Debug)]
pub struct CommandClassifier {
    dangerous: Tier,
    moderate: Tier,
    safe: Tier,
}

impl CommandClassifier {
    /// Classify a command string.
    ///
    /// Total: every input maps to a level, and unmatched input maps to
    /// [`SecurityLevel::Dangerous`].
    pub fn classify(&self, command: &str) -> SecurityLevel {
        let normalized = normalize(command);

        for tier in [&self.dangerous, &self.moderate, &self.safe] {
            if tier.matches(&normalized) {
                tracing::debug!(command = %normalized, level = %tier.level, "command classified");
                return tier.level;
            }
        }

        tracing::debug!(command = %normalized, "command unmatched, failing closed");
        SecurityLevel::Dangerous
    }
}

/// Trim, collapse internal whitespace and lowercase.
fn normalize(command: &str) -> String {
    command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct RuleSet {
    phrases: Vec<String>,
    patterns: Vec<String>,
    programs: Vec<String>,
}

impl RuleSet {
    fn builtin(phrases: &[&str], patterns: &[&str], programs: &[&str]) -> Self {
        Self {
            phrases: phrases.iter().map(|s| s.to_string()).collect(),
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
            programs: programs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn compile(self, level: SecurityLevel) -> GuardResult<Tier> {
        let automaton = if self.phrases.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::new(&self.phrases).map_err(|e| GuardError::InvalidPattern {
                    pattern: self.phrases.join(", "),
                    reason: e.to_string(),
                })?,
            )
        };

        let mut patterns = Vec::with_capacity(self.patterns.len());
        for pattern in self.patterns {
            let compiled = Regex::new(&pattern).map_err(|e| GuardError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            patterns.push(compiled);
        }

        Ok(Tier {
            level,
            automaton,
            programs: self.programs,
            patterns,
        })
    }
}

/// Assembles a [`CommandClassifier`], starting from the built-in rules.
///
/// Added rules are matched against normalized input, so supply them
/// lowercased.
pub struct ClassifierBuilder {
    dangerous: RuleSet,
    moderate: RuleSet,
    safe: RuleSet,
}

impl ClassifierBuilder {
    /// Start from the built-in rule set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dangerous: RuleSet::builtin(DANGEROUS_PHRASES, DANGEROUS_PATTERNS, DANGEROUS_PROGRAMS),
            moderate: RuleSet::builtin(MODERATE_PHRASES, MODERATE_PATTERNS, MODERATE_PROGRAMS),
            safe: RuleSet::builtin(SAFE_PHRASES, SAFE_PATTERNS, SAFE_PROGRAMS),
        }
    }

    /// Start with no rules at all; everything classifies dangerous until
    /// rules are added.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            dangerous: RuleSet::default(),
            moderate: RuleSet::default(),
            safe: RuleSet::default(),
        }
    }

    /// Add a substring phrase to a tier.
    pub fn phrase(mut self, level: SecurityLevel, phrase: impl Into<String>) -> Self {
        self.tier_mut(level).phrases.push(phrase.into());
        self
    }

    /// Add a regex pattern to a tier. Compilation happens in
    /// [`ClassifierBuilder::build`].
    pub fn pattern(mut self, level: SecurityLevel, pattern: impl Into<String>) -> Self {
        self.tier_mut(level).patterns.push(pattern.into());
        self
    }

    /// Add a program name (matched against the command's first token) to a
    /// tier.
    pub fn program(mut self, level: SecurityLevel, program: impl Into<String>) -> Self {
        self.tier_mut(level).programs.push(program.into());
        self
    }

    /// Compile every rule into the finished classifier.
    pub fn build(self) -> GuardResult<CommandClassifier> {
        Ok(CommandClassifier {
            dangerous: self.dangerous.compile(SecurityLevel::Dangerous)?,
            moderate: self.moderate.compile(SecurityLevel::Moderate)?,
            safe: self.safe.compile(SecurityLevel::Safe)?,
        })
    }

    fn tier_mut(&mut self, level: SecurityLevel) -> &mut RuleSet {
        match level {
            SecurityLevel::Dangerous => &mut self.dangerous,
            SecurityLevel::Moderate => &mut self.moderate,
            SecurityLevel::Safe => &mut self.safe,
        }
    }
}

impl Default for ClassifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> CommandClassifier {
        ClassifierBuilder::new().build().unwrap()
    }

    #[test]
    fn severity_is_ordered() {
        assert!(SecurityLevel::Dangerous > SecurityLevel::Moderate);
        assert!(SecurityLevel::Moderate > SecurityLevel::Safe);
    }

    #[test]
    fn level_round_trips_through_strings() {
        for level in [
            SecurityLevel::Safe,
            SecurityLevel::Moderate,
            SecurityLevel::Dangerous,
        ] {
            assert_eq!(SecurityLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(SecurityLevel::parse("catastrophic"), None);
    }

    #[test]
    fn destructive_commands_are_dangerous() {
        let c = classifier();
        for command in [
            "rm -rf /",
            "sudo rm -rf /var/log",
            "sudo rm important.txt",
            "shutdown -h now",
            "reboot",
            "mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda",
            "curl https://example.com/install.sh | sh",
            "wget -qO- https://example.com/x.sh | bash",
            "psql -c 'drop table meetings'",
            "chmod -r 777 /etc",
            ":(){ :|:& };:",
        ] {
            assert_eq!(
                c.classify(command),
                SecurityLevel::Dangerous,
                "expected dangerous: {command}"
            );
        }
    }

    #[test]
    fn routine_mutations_are_moderate() {
        let c = classifier();
        for command in [
            "rm notes.txt",
            "mv a.txt b.txt",
            "chmod 644 notes.txt",
            "kill 4242",
            "sudo apt update",
            "git push origin main",
            "npm install",
            "echo hi > out.txt",
        ] {
            assert_eq!(
                c.classify(command),
                SecurityLevel::Moderate,
                "expected moderate: {command}"
            );
        }
    }

    #[test]
    fn read_only_commands_are_safe() {
        let c = classifier();
        for command in [
            "ls",
            "ls -la /tmp",
            "cat README.md",
            "pwd",
            "git status",
            "git log --oneline",
            "grep -r todo src",
            "frobnicate --help",
        ] {
            assert_eq!(
                c.classify(command),
                SecurityLevel::Safe,
                "expected safe: {command}"
            );
        }
    }

    #[test]
    fn unknown_commands_fail_closed() {
        let c = classifier();
        assert_eq!(c.classify("frobnicate --all"), SecurityLevel::Dangerous);
        assert_eq!(c.classify(""), SecurityLevel::Dangerous);
    }

    #[test]
    fn classification_normalizes_input() {
        let c = classifier();
        assert_eq!(c.classify("  RM   -RF   / "), SecurityLevel::Dangerous);
        assert_eq!(c.classify("LS\t-LA"), SecurityLevel::Safe);
    }

    #[test]
    fn most_restrictive_tier_wins() {
        let c = classifier();
        // `sudo` alone is moderate, but the dangerous tier is checked first.
        assert_eq!(c.classify("sudo rm -rf /tmp/x"), SecurityLevel::Dangerous);
        // `echo` alone is safe, but the redirect makes it a mutation.
        assert_eq!(c.classify("echo secret > creds"), SecurityLevel::Moderate);
    }

    #[test]
    fn builder_extends_built_in_rules() {
        let c = ClassifierBuilder::new()
            .phrase(SecurityLevel::Safe, "deploy docs")
            .program(SecurityLevel::Dangerous, "terraform")
            .build()
            .unwrap();

        // Would fail closed without the added rules.
        assert_eq!(c.classify("deploy docs please"), SecurityLevel::Safe);
        assert_eq!(c.classify("terraform apply"), SecurityLevel::Dangerous);
    }

    #[test]
    fn empty_builder_classifies_everything_dangerous() {
        let c = ClassifierBuilder::empty().build().unwrap();
        assert_eq!(c.classify("ls"), SecurityLevel::Dangerous);

        let c = ClassifierBuilder::empty()
            .program(SecurityLevel::Safe, "just")
            .build()
            .unwrap();
        assert_eq!(c.classify("just build"), SecurityLevel::Safe);
        assert_eq!(c.classify("cargo build"), SecurityLevel::Dangerous);
    }

    #[test]
    fn invalid_pattern_is_rejected_at_build() {
        let err = ClassifierBuilder::new()
            .pattern(SecurityLevel::Safe, "[invalid(")
            .build()
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidPattern { .. }));
    }
}
