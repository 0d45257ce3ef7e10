//! Minimal version specifiers for `requires-python` checks.
//!
//! The runtime version of a base image is only known to `major.minor`
//! precision (from its tag), so comparisons run on the shared prefix of the
//! two versions: a clause is rejected only when it is certainly violated.

use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a specifier clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Compatible,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Arbitrary,
}

/// One clause, such as `>=3.12` or `==3.12.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Op,
    raw: String,
    version: Vec<u64>,
    wildcard: bool,
}

/// A comma-separated set of clauses; all must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpecifiers {
    clauses: Vec<Clause>,
}

/// Error returned for unparseable specifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecifierError(pub String);

impl fmt::Display for SpecifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version specifier \"{}\"", self.0)
    }
}

impl std::error::Error for SpecifierError {}

/// Parses the leading numeric release segment of a version (`3.12.1rc1`
/// yields `[3, 12, 1]`).
#[must_use]
pub fn parse_release(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map_while(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse().ok()
            }
        })
        .collect()
}

impl VersionSpecifiers {
    /// Parses a specifier string such as `">=3.11, <3.14"`.
    ///
    /// # Errors
    ///
    /// Returns an error if a clause has no known operator or no version.
    pub fn parse(input: &str) -> Result<Self, SpecifierError> {
        let mut clauses = Vec::new();
        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (op, rest) = split_op(part).ok_or_else(|| SpecifierError(input.to_string()))?;
            let rest = rest.trim();
            let wildcard = rest.ends_with(".*");
            let version = parse_release(rest.trim_end_matches(".*"));
            if version.is_empty() && op != Op::Arbitrary {
                return Err(SpecifierError(input.to_string()));
            }
            if op == Op::Compatible && version.len() < 2 {
                return Err(SpecifierError(input.to_string()));
            }
            clauses.push(Clause {
                op,
                raw: rest.to_string(),
                version,
                wildcard,
            });
        }
        Ok(Self { clauses })
    }

    /// Returns `true` unless `runtime` certainly violates some clause.
    #[must_use]
    pub fn admits(&self, runtime: &str) -> bool {
        let r = parse_release(runtime);
        self.clauses.iter().all(|c| c.admits(&r, runtime))
    }
}

fn split_op(clause: &str) -> Option<(Op, &str)> {
    const OPS: &[(&str, Op)] = &[
        ("===", Op::Arbitrary),
        ("~=", Op::Compatible),
        ("==", Op::Eq),
        ("!=", Op::Ne),
        ("<=", Op::Le),
        (">=", Op::Ge),
        ("<", Op::Lt),
        (">", Op::Gt),
    ];
    OPS.iter()
        .find_map(|(prefix, op)| clause.strip_prefix(prefix).map(|rest| (*op, rest)))
}

fn compare_prefix(a: &[u64], b: &[u64]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

impl Clause {
    fn admits(&self, r: &[u64], raw_runtime: &str) -> bool {
        let v = &self.version;
        let prefix_ord = compare_prefix(r, v);
        let mut ord = prefix_ord;
        if ord == Ordering::Equal && r.len() > v.len() && r[v.len()..].iter().any(|&x| x > 0) {
            ord = Ordering::Greater;
        }
        // The runtime may carry fewer components than the clause.
        let undecided = v.len() > r.len();
        match self.op {
            Op::Ge => ord != Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater || (ord == Ordering::Equal && undecided),
            Op::Lt => ord == Ordering::Less || (ord == Ordering::Equal && undecided),
            Op::Eq if self.wildcard => prefix_ord == Ordering::Equal,
            Op::Eq => ord == Ordering::Equal,
            Op::Ne if self.wildcard => prefix_ord != Ordering::Equal,
            Op::Ne => undecided || ord != Ordering::Equal,
            Op::Compatible => {
                let prefix = &v[..v.len() - 1];
                ord != Ordering::Less && compare_prefix(r, prefix) == Ordering::Equal
            }
            Op::Arbitrary => raw_runtime.trim() == self.raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admits(spec: &str, runtime: &str) -> bool {
        VersionSpecifiers::parse(spec).expect("parse").admits(runtime)
    }

    #[test]
    fn release_parsing_stops_at_non_numeric() {
        assert_eq!(parse_release("3.12.1rc1"), vec![3, 12, 1]);
        assert_eq!(parse_release("3.12"), vec![3, 12]);
        assert!(parse_release("slim").is_empty());
    }

    #[test]
    fn lower_bounds() {
        assert!(admits(">=3.12", "3.12"));
        assert!(admits(">=3.11", "3.12"));
        assert!(!admits(">=3.13", "3.12"));
        // Patch level of the runtime is unknown.
        assert!(admits(">=3.12.4", "3.12"));
        assert!(admits(">3.11", "3.12"));
        assert!(!admits(">3.12", "3.12"));
        assert!(admits(">3.12", "3.12.1"));
    }

    #[test]
    fn upper_bounds_and_ranges() {
        assert!(admits(">=3.10, <3.13", "3.12"));
        assert!(!admits(">=3.10, <3.12", "3.12"));
        assert!(admits("<=3.12", "3.12"));
        assert!(!admits("<=3.11", "3.12"));
    }

    #[test]
    fn equality_and_wildcards() {
        assert!(admits("==3.12.*", "3.12"));
        assert!(admits("==3.12.*", "3.12.7"));
        assert!(!admits("==3.11.*", "3.12"));
        assert!(admits("!=3.11.*", "3.12"));
        assert!(!admits("!=3.12.*", "3.12"));
        assert!(admits("!=3.12.1", "3.12"));
    }

    #[test]
    fn compatible_release() {
        assert!(admits("~=3.10", "3.12"));
        assert!(!admits("~=3.10", "4.0"));
        assert!(!admits("~=3.13", "3.12"));
    }

    #[test]
    fn malformed_specifiers_are_rejected() {
        assert!(VersionSpecifiers::parse("3.12").is_err());
        assert!(VersionSpecifiers::parse(">=").is_err());
        assert!(VersionSpecifiers::parse("~=3").is_err());
    }
}
