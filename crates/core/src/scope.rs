//! Delegation scope and capability URI implementation.
//!
//! A delegation scope is the short-lived authorization a session requests:
//! an ordered set of `(capability kind, resource pattern)` pairs, an absolute
//! expiration and a human-readable statement. Each pair is rendered into a
//! capability URI that gets embedded into the signed sign-in statement, and
//! the verifying nodes check requests against those exact URIs.
//!
//! Rendering is scheme-sensitive: the scheme set used by the builder must be
//! byte-for-byte identical to the scheme set the verifier checks against.
//! A mismatch does not degrade anything silently; it makes every downstream
//! request fail with [`Error::CapabilityNotFound`].

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// A kind of delegated capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    /// Threshold signing over arbitrary payloads.
    Signing,
    /// Remote code execution with the custodied key made available.
    Execution,
}

/// The capability URI schemes a party renders and checks.
///
/// Builder and verifier must agree on these exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeSet {
    /// Scheme for [`CapabilityKind::Signing`] resources.
    pub signing: String,
    /// Scheme for [`CapabilityKind::Execution`] resources.
    pub execution: String,
}

impl SchemeSet {
    /// Returns the scheme for a capability kind.
    pub fn scheme_for(&self, kind: CapabilityKind) -> &str {
        match kind {
            CapabilityKind::Signing => &self.signing,
            CapabilityKind::Execution => &self.execution,
        }
    }
}

impl Default for SchemeSet {
    /// The scheme set the production signer network verifies against.
    fn default() -> Self {
        Self {
            signing: "entrust-sign".to_owned(),
            execution: "entrust-exec".to_owned(),
        }
    }
}

/// A `(capability kind, resource pattern)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// The capability kind.
    pub kind: CapabilityKind,
    /// The resource pattern; `*` covers every resource of the kind.
    pub pattern: String,
}

impl Resource {
    /// Returns a wildcard resource for a capability kind.
    pub fn any(kind: CapabilityKind) -> Self {
        Self {
            kind,
            pattern: "*".to_owned(),
        }
    }

    /// Renders the resource as a capability URI under the given scheme set.
    pub fn render(&self, schemes: &SchemeSet) -> String {
        format!("{}://{}", schemes.scheme_for(self.kind), self.pattern)
    }
}

/// A short-lived, scoped authorization request.
///
/// Constructed fresh per session; the expiration must be strictly in the
/// future at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationScope {
    /// The delegated resources, in request order.
    pub resources: Vec<Resource>,
    /// Absolute expiration of the delegation.
    pub expiration: DateTime<Utc>,
    /// Human-readable text bound into the signed delegation.
    pub statement: String,
    /// The domain requesting the delegation.
    pub domain: String,
    /// The audience URI the delegation is addressed to.
    pub audience: String,
}

impl DelegationScope {
    /// Given resources, an expiration and the requesting domain/audience pair,
    /// returns a new delegation scope, or an `Err` result if the expiration
    /// is not strictly in the future or the statement text spans multiple
    /// lines.
    ///
    /// The expiration is truncated to the millisecond precision of the
    /// statement rendering, so the scope and the signed evidence derived from
    /// it agree exactly.
    pub fn new(
        resources: Vec<Resource>,
        expiration: DateTime<Utc>,
        statement: impl Into<String>,
        domain: impl Into<String>,
        audience: impl Into<String>,
    ) -> Result<Self, Error> {
        let statement = statement.into();
        // The statement rendering is line-oriented; embedded newlines would
        // render but never parse back.
        if statement.contains('\n') {
            return Err(Error::Validation {
                field: "statement".to_owned(),
                message: "statement text must be a single line".to_owned(),
            });
        }
        let expiration = expiration
            .duration_trunc(Duration::milliseconds(1))
            .map_err(|err| Error::Validation {
                field: "expiration".to_owned(),
                message: err.to_string(),
            })?;
        let now = Utc::now();
        if expiration <= now {
            return Err(Error::ExpirationInPast { expiration, now });
        }
        Ok(Self {
            resources,
            expiration,
            statement,
            domain: domain.into(),
            audience: audience.into(),
        })
    }

    /// Renders all resources as capability URIs under the given scheme set,
    /// preserving request order.
    pub fn render_resources(&self, schemes: &SchemeSet) -> Vec<String> {
        self.resources
            .iter()
            .map(|resource| resource.render(schemes))
            .collect()
    }

    /// Returns an `Ok` result if the scope has not expired at `now`,
    /// or an appropriate `Err` result otherwise.
    pub fn check_fresh(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.expiration <= now {
            return Err(Error::Expired(self.expiration));
        }
        Ok(())
    }
}

/// Given the capability URIs embedded in a signed delegation, the capability
/// kind and resource a request needs, and the verifier's scheme set,
/// returns an `Ok` result if some delegated URI covers the request,
/// or a [`Error::CapabilityNotFound`] result otherwise.
///
/// The scheme comparison is exact: a delegation rendered under a different
/// scheme set never matches, regardless of its pattern.
pub fn match_capability(
    delegated: &[String],
    kind: CapabilityKind,
    resource: &str,
    schemes: &SchemeSet,
) -> Result<(), Error> {
    let prefix = format!("{}://", schemes.scheme_for(kind));
    let covered = delegated.iter().any(|uri| {
        uri.strip_prefix(&prefix)
            .map(|pattern| pattern == "*" || pattern == resource)
            .unwrap_or(false)
    });
    if covered {
        Ok(())
    } else {
        Err(Error::CapabilityNotFound {
            resource: format!("{prefix}{resource}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scope_with(resources: Vec<Resource>) -> DelegationScope {
        DelegationScope::new(
            resources,
            Utc::now() + Duration::minutes(10),
            "Delegate signing to this session",
            "app.example.com",
            "https://app.example.com",
        )
        .unwrap()
    }

    #[test]
    fn expiration_must_be_in_the_future() {
        let result = DelegationScope::new(
            vec![Resource::any(CapabilityKind::Signing)],
            Utc::now() - Duration::seconds(1),
            "stale",
            "app.example.com",
            "https://app.example.com",
        );
        assert!(matches!(result, Err(Error::ExpirationInPast { .. })));
    }

    #[test]
    fn statement_text_must_be_single_line() {
        let result = DelegationScope::new(
            vec![Resource::any(CapabilityKind::Signing)],
            Utc::now() + Duration::minutes(10),
            "Delegate signing\nto this session",
            "app.example.com",
            "https://app.example.com",
        );
        assert!(matches!(
            result,
            Err(Error::Validation { field, .. }) if field == "statement"
        ));
    }

    #[test]
    fn expiration_is_truncated_to_rendering_precision() {
        let scope = scope_with(vec![Resource::any(CapabilityKind::Signing)]);
        assert_eq!(scope.expiration.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn resource_rendering_works() {
        let schemes = SchemeSet::default();
        let scope = scope_with(vec![
            Resource::any(CapabilityKind::Signing),
            Resource {
                kind: CapabilityKind::Execution,
                pattern: "QmValidation".to_owned(),
            },
        ]);

        assert_eq!(
            scope.render_resources(&schemes),
            vec![
                "entrust-sign://*".to_owned(),
                "entrust-exec://QmValidation".to_owned()
            ]
        );
    }

    #[test]
    fn capability_matching_works() {
        let schemes = SchemeSet::default();
        let scope = scope_with(vec![Resource::any(CapabilityKind::Signing)]);
        let delegated = scope.render_resources(&schemes);

        // Wildcard covers any signing resource.
        assert!(match_capability(&delegated, CapabilityKind::Signing, "*", &schemes).is_ok());
        assert!(match_capability(&delegated, CapabilityKind::Signing, "digest", &schemes).is_ok());

        // No execution capability was delegated.
        assert_eq!(
            match_capability(&delegated, CapabilityKind::Execution, "*", &schemes),
            Err(Error::CapabilityNotFound {
                resource: "entrust-exec://*".to_owned()
            })
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn scheme_strategy() -> impl Strategy<Value = String> {
            "[a-z][a-z0-9-]{2,24}"
        }

        fn pattern_strategy() -> impl Strategy<Value = String> {
            prop_oneof![Just("*".to_owned()), "[A-Za-z0-9]{1,32}"]
        }

        proptest! {
            // A delegation rendered under scheme A checked against scheme B
            // fails with the capability-not-found category and no other,
            // for every scheme pair and resource pattern; equal schemes with
            // a covering pattern never produce that error.
            #[test]
            fn scheme_agreement_decides_capability_lookup(
                builder_scheme in scheme_strategy(),
                verifier_scheme in scheme_strategy(),
                pattern in pattern_strategy(),
            ) {
                let builder = SchemeSet {
                    signing: builder_scheme.clone(),
                    execution: "entrust-exec".to_owned(),
                };
                let verifier = SchemeSet {
                    signing: verifier_scheme.clone(),
                    execution: "entrust-exec".to_owned(),
                };
                let delegated = vec![Resource {
                    kind: CapabilityKind::Signing,
                    pattern: pattern.clone(),
                }
                .render(&builder)];

                let result =
                    match_capability(&delegated, CapabilityKind::Signing, &pattern, &verifier);
                if builder_scheme == verifier_scheme {
                    prop_assert!(result.is_ok());
                } else {
                    prop_assert_eq!(
                        result,
                        Err(Error::CapabilityNotFound {
                            resource: format!("{verifier_scheme}://{pattern}"),
                        })
                    );
                }
            }
        }
    }

    #[test]
    fn mismatched_scheme_never_matches() {
        let scope = scope_with(vec![Resource::any(CapabilityKind::Execution)]);
        // Rendered under a scheme the verifier does not check.
        let delegated = scope.render_resources(&SchemeSet {
            signing: "entrust-sign".to_owned(),
            execution: "entrust-execaction".to_owned(),
        });

        assert_eq!(
            match_capability(
                &delegated,
                CapabilityKind::Execution,
                "*",
                &SchemeSet::default()
            ),
            Err(Error::CapabilityNotFound {
                resource: "entrust-exec://*".to_owned()
            })
        );
    }
}
