use crate::prelude::*;

use super::reqparse;

pub mod marker {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub enum Value {
        Variable(String),
        Literal(String),
    }

    impl Value {
        pub fn is_extra(&self) -> bool {
            matches!(self, Value::Variable(v) if v == "extra")
        }
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub enum Op {
        Compare(CompareOp),
        In,
        NotIn,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub enum Expr {
        And(Box<Expr>, Box<Expr>),
        Or(Box<Expr>, Box<Expr>),
        Operator { op: Op, lhs: Value, rhs: Value },
    }

    /// What a marker is evaluated against: a lookup from marker variable name
    /// (`python_version`, `sys_platform`, `extra`, ...) to its value for one resolve.
    pub trait Env {
        fn get_marker_var(&self, var: &str) -> Option<&str>;
    }

    impl Env for HashMap<String, String> {
        fn get_marker_var(&self, var: &str) -> Option<&str> {
            self.get(var).map(|s| s.as_str())
        }
    }

    impl Value {
        fn eval(&self, env: &dyn Env) -> Result<String> {
            match self {
                Value::Variable(varname) => env
                    .get_marker_var(varname)
                    .map(|s| s.to_owned())
                    .ok_or_else(|| anyhow!("no environment marker named '{}'", varname)),
                Value::Literal(s) => Ok(s.clone()),
            }
        }
    }

    impl Expr {
        pub fn eval(&self, env: &dyn Env) -> Result<bool> {
            Ok(match self {
                Expr::And(lhs, rhs) => lhs.eval(env)? && rhs.eval(env)?,
                Expr::Or(lhs, rhs) => lhs.eval(env)? || rhs.eval(env)?,
                Expr::Operator { op, lhs, rhs } => {
                    let lhs_val = lhs.eval(env)?;
                    let rhs_val = rhs.eval(env)?;
                    match op {
                        Op::In => rhs_val.contains(&lhs_val),
                        Op::NotIn => !rhs_val.contains(&lhs_val),
                        Op::Compare(op) => {
                            // If both sides parse as versions (or the RHS parses as a
                            // wildcard with a wildcard-accepting op), compare as versions.
                            if let Ok(lhs_ver) = lhs_val.parse() {
                                if let Ok(rhs_ranges) = op.to_ranges(&rhs_val) {
                                    return Ok(rhs_ranges
                                        .into_iter()
                                        .any(|r| r.contains(&lhs_ver)));
                                }
                            }
                            // Otherwise a plain string comparison.
                            use CompareOp::*;
                            match op {
                                LessThanEqual => lhs_val <= rhs_val,
                                StrictlyLessThan => lhs_val < rhs_val,
                                NotEqual => lhs_val != rhs_val,
                                Equal => lhs_val == rhs_val,
                                GreaterThanEqual => lhs_val >= rhs_val,
                                StrictlyGreaterThan => lhs_val > rhs_val,
                                Compatible => bail!("~= requires valid version strings"),
                            }
                        }
                    }
                }
            })
        }

        /// Whether this expression (or a sub-expression) mentions `extra` at all.
        pub fn is_extra(&self) -> bool {
            match self {
                Expr::Operator { lhs, rhs, .. } => lhs.is_extra() || rhs.is_extra(),
                Expr::And(l, r) | Expr::Or(l, r) => l.is_extra() || r.is_extra(),
            }
        }
    }

    impl Display for Value {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Value::Variable(v) => write!(f, "{}", v),
                Value::Literal(s) => write!(f, "{:?}", s),
            }
        }
    }

    impl Display for Op {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Op::Compare(op) => write!(f, "{}", op),
                Op::In => write!(f, "in"),
                Op::NotIn => write!(f, "not in"),
            }
        }
    }

    impl Display for Expr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Expr::And(l, r) => write!(f, "{} and {}", l, r),
                Expr::Or(l, r) => write!(f, "{} or {}", l, r),
                Expr::Operator { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            }
        }
    }
}

/// A marker expression lifted out of its requirement, for recording in a Blueprint
/// as a condition the resolve result depends on but the platform doesn't yet
/// decide (e.g. `python_version < "3"` once `extra` has been simplified away).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StandaloneMarkerExpr(pub marker::Expr);

impl Display for StandaloneMarkerExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParseExtra {
    Allowed,
    NotAllowed,
}

/// The shape a PEP 508 requirement string parses into. Bind it to one of the
/// stricter views below depending on where the string came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: PackageName,
    pub extras: Vec<Extra>,
    pub specifiers: Specifiers,
    pub env_marker: Option<marker::Expr>,
}

fn fmt_requirement(
    f: &mut std::fmt::Formatter<'_>,
    name: &PackageName,
    extras: &[Extra],
    specifiers: &Specifiers,
    env_marker: Option<&marker::Expr>,
) -> std::fmt::Result {
    write!(f, "{}", name.as_given())?;
    if !extras.is_empty() {
        write!(
            f,
            "[{}]",
            extras.iter().map(|e| e.as_given()).collect::<Vec<_>>().join(",")
        )?;
    }
    if !specifiers.0.is_empty() {
        write!(f, " {}", specifiers)?;
    }
    if let Some(m) = env_marker {
        write!(f, "; {}", m)?;
    }
    Ok(())
}

impl Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_requirement(
            f,
            &self.name,
            &self.extras,
            &self.specifiers,
            self.env_marker.as_ref(),
        )
    }
}

/// A dependency as declared in another project's own metadata (`Requires-Dist`):
/// its marker may reference `extra`, since it's evaluated once per requested extra.
#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct PackageRequirement {
    pub name: PackageName,
    pub extras: Vec<Extra>,
    pub specifiers: Specifiers,
    pub env_marker_expr: Option<marker::Expr>,
}

impl From<Requirement> for PackageRequirement {
    fn from(r: Requirement) -> Self {
        PackageRequirement {
            name: r.name,
            extras: r.extras,
            specifiers: r.specifiers,
            env_marker_expr: r.env_marker,
        }
    }
}

impl TryFrom<&str> for PackageRequirement {
    type Error = anyhow::Error;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        let req = reqparse::requirement(input, ParseExtra::Allowed)
            .with_context(|| format!("failed parsing requirement string {:?}", input))?;
        Ok(req.into())
    }
}

try_from_str_boilerplate!(PackageRequirement);

impl Display for PackageRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_requirement(
            f,
            &self.name,
            &self.extras,
            &self.specifiers,
            self.env_marker_expr.as_ref(),
        )
    }
}

/// A requirement as typed on a command line or listed as a manifest root
/// requirement. `extra==` markers don't make sense here -- there's no enclosing
/// project to bind them to -- so the parser rejects them (`ParseExtra::NotAllowed`).
#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct UserRequirement {
    pub name: PackageName,
    pub extras: Vec<Extra>,
    pub specifiers: Specifiers,
    pub env_marker: Option<marker::Expr>,
}

impl TryFrom<&str> for UserRequirement {
    type Error = anyhow::Error;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        let req = reqparse::requirement(input, ParseExtra::NotAllowed)
            .with_context(|| format!("failed parsing requirement string {:?}", input))?;
        Ok(UserRequirement {
            name: req.name,
            extras: req.extras,
            specifiers: req.specifiers,
            env_marker: req.env_marker,
        })
    }
}

try_from_str_boilerplate!(UserRequirement);

impl Display for UserRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_requirement(
            f,
            &self.name,
            &self.extras,
            &self.specifiers,
            self.env_marker.as_ref(),
        )
    }
}

/// The `python-version`/`Requires-Python` constraint: a bare specifier set with no
/// package name, since it always binds to the interpreter itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, SerializeDisplay, DeserializeFromStr)]
pub struct PythonRequirement {
    pub specifiers: Specifiers,
}

impl TryFrom<&str> for PythonRequirement {
    type Error = anyhow::Error;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        Ok(PythonRequirement { specifiers: input.try_into()? })
    }
}

try_from_str_boilerplate!(PythonRequirement);

impl Display for PythonRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.specifiers)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_smoke() {
        let r: PackageRequirement =
            "twisted[tls] >= 20, != 20.1.*; python_version >= '3'".try_into().unwrap();
        assert_eq!(r.name.as_given(), "twisted");
        assert_eq!(r.extras.len(), 1);
        assert!(r.env_marker_expr.is_some());
    }

    #[test]
    fn test_user_requirement_rejects_extra_marker() {
        let result: Result<UserRequirement, _> = "foo; extra == 'bar'".try_into();
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trip_display() {
        let r: PackageRequirement = "attrs>=19.2.0".try_into().unwrap();
        assert_eq!(r.to_string(), "attrs >= 19.2.0");
    }
}
