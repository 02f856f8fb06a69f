/// Request validation
///
/// Structural checks run before any service work: length bounds, email
/// shape, enumerated-value membership, and the configured password policy.
/// Rules are registered once at startup into a static table keyed by field
/// name; uniqueness checks against stored data belong to the credential
/// store, not here.
use crate::{
    config::{PasswordPolicy, VALID_ROLES, VALID_STATUSES},
    error::{FieldError, ServiceError, ServiceResult},
};
use std::collections::HashMap;

type Predicate = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Field validator with a fixed rule table
pub struct RequestValidator {
    rules: HashMap<&'static str, Vec<Predicate>>,
}

impl RequestValidator {
    /// Build the rule table from the configured password policy
    pub fn new(policy: &PasswordPolicy) -> Self {
        let mut rules: HashMap<&'static str, Vec<Predicate>> = HashMap::new();

        rules.insert(
            "name",
            vec![
                non_empty(),
                length_between(2, 100),
            ],
        );
        rules.insert(
            "title",
            vec![length_between(0, 100)],
        );
        rules.insert(
            "email",
            vec![
                non_empty(),
                length_between(3, 254),
                Box::new(|v| {
                    if is_valid_email(v) {
                        None
                    } else {
                        Some("must be a valid email address".to_string())
                    }
                }),
            ],
        );
        rules.insert("password", password_rules(policy));
        rules.insert(
            "role",
            vec![one_of("role", VALID_ROLES)],
        );
        rules.insert(
            "status",
            vec![one_of("status", VALID_STATUSES)],
        );

        Self { rules }
    }

    /// Run every registered predicate for the given (field, value) pairs.
    /// Returns all failures at once so callers see the full field list.
    pub fn check(&self, fields: &[(&'static str, &str)]) -> ServiceResult<()> {
        let mut errors = Vec::new();

        for (field, value) in fields {
            if let Some(predicates) = self.rules.get(field) {
                for predicate in predicates {
                    if let Some(message) = predicate(value) {
                        errors.push(FieldError::new(*field, message));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(errors))
        }
    }

    /// Validate a single field
    pub fn check_field(&self, field: &'static str, value: &str) -> ServiceResult<()> {
        self.check(&[(field, value)])
    }
}

fn non_empty() -> Predicate {
    Box::new(|v| {
        if v.trim().is_empty() {
            Some("must not be empty".to_string())
        } else {
            None
        }
    })
}

fn length_between(min: usize, max: usize) -> Predicate {
    Box::new(move |v| {
        let len = v.chars().count();
        if len < min {
            Some(format!("must be at least {} characters", min))
        } else if len > max {
            Some(format!("must be at most {} characters", max))
        } else {
            None
        }
    })
}

fn one_of(what: &'static str, allowed: &'static [&'static str]) -> Predicate {
    Box::new(move |v| {
        if allowed.contains(&v) {
            None
        } else {
            Some(format!("unknown {}: must be one of {}", what, allowed.join(", ")))
        }
    })
}

fn password_rules(policy: &PasswordPolicy) -> Vec<Predicate> {
    let mut predicates = vec![length_between(policy.min_length, policy.max_length)];

    if policy.require_upper {
        predicates.push(Box::new(|v: &str| {
            if v.chars().any(|c| c.is_ascii_uppercase()) {
                None
            } else {
                Some("must contain an uppercase letter".to_string())
            }
        }));
    }
    if policy.require_lower {
        predicates.push(Box::new(|v: &str| {
            if v.chars().any(|c| c.is_ascii_lowercase()) {
                None
            } else {
                Some("must contain a lowercase letter".to_string())
            }
        }));
    }
    if policy.require_digit {
        predicates.push(Box::new(|v: &str| {
            if v.chars().any(|c| c.is_ascii_digit()) {
                None
            } else {
                Some("must contain a digit".to_string())
            }
        }));
    }
    if policy.require_special {
        predicates.push(Box::new(|v: &str| {
            if v.chars().any(|c| !c.is_ascii_alphanumeric()) {
                None
            } else {
                Some("must contain a special character".to_string())
            }
        }));
    }

    predicates
}

/// Minimal email shape check: one `@`, non-empty local part, and a domain
/// containing a dot
pub fn is_valid_email(email: &str) -> bool {
    if email.contains(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Canonical form stored and compared: trimmed and lowercased
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
