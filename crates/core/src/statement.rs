//! Structured sign-in statement implementation.
//!
//! A wallet identity proves control of its address by signing a structured
//! statement binding the requesting domain, the address, a nonce, issued-at
//! and expiration timestamps and the requested capability resources. The
//! canonical rendering follows the Sign-In with Ethereum message layout so
//! that any stock wallet can display and sign it.
//!
//! Ref: <https://eips.ethereum.org/EIPS/eip-4361>.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::crypto::Address;
use crate::errors::Error;

/// The sign-in statement version bound into every rendering.
pub const VERSION: u8 = 1;

/// A structured sign-in statement.
///
/// Immutable once built; the signature must cover the canonical rendering
/// byte for byte, so the statement is rendered exactly once per signature
/// request and never edited afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInStatement {
    /// The domain requesting the signature.
    pub domain: String,
    /// The wallet address being signed in.
    pub address: Address,
    /// Human-readable statement text bound into the signature.
    pub statement: String,
    /// The URI of the requesting origin.
    pub uri: String,
    /// The chain id the sign-in applies to.
    pub chain_id: u64,
    /// A single-use random nonce.
    pub nonce: String,
    /// When the statement was issued.
    pub issued_at: DateTime<Utc>,
    /// When the statement (and anything delegated through it) expires.
    pub expiration: DateTime<Utc>,
    /// Capability URIs delegated through this sign-in, in request order.
    pub resources: Vec<String>,
}

impl SignInStatement {
    /// Returns the canonical UTF-8 rendering of the statement.
    ///
    /// This exact byte sequence is what the wallet signs and what the
    /// verifier re-parses; any deviation invalidates the signature.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{domain} wants you to sign in with your Ethereum account:\n\
             {address}\n\
             \n\
             {statement}\n\
             \n\
             URI: {uri}\n\
             Version: {version}\n\
             Chain ID: {chain_id}\n\
             Nonce: {nonce}\n\
             Issued At: {issued_at}\n\
             Expiration Time: {expiration}",
            domain = self.domain,
            address = self.address.to_lower_hex(),
            statement = self.statement,
            uri = self.uri,
            version = VERSION,
            chain_id = self.chain_id,
            nonce = self.nonce,
            issued_at = render_timestamp(&self.issued_at),
            expiration = render_timestamp(&self.expiration),
        );
        if !self.resources.is_empty() {
            out.push_str("\nResources:");
            for resource in &self.resources {
                out.push_str("\n- ");
                out.push_str(resource);
            }
        }
        out
    }

    /// Parses a statement back from its canonical rendering.
    ///
    /// Used by the verifier to extract the delegated resources and time
    /// bounds from the exact bytes the wallet signed.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut lines = text.lines();

        let header = lines
            .next()
            .ok_or_else(|| malformed("empty statement"))?;
        let domain = header
            .strip_suffix(" wants you to sign in with your Ethereum account:")
            .ok_or_else(|| malformed("missing sign-in header"))?
            .to_owned();
        let address_line = lines.next().ok_or_else(|| malformed("missing address"))?;
        let address = Address::from_hex(address_line).map_err(|_| malformed("invalid address"))?;

        expect_blank(lines.next())?;
        let statement = lines
            .next()
            .ok_or_else(|| malformed("missing statement text"))?
            .to_owned();
        expect_blank(lines.next())?;

        let uri = field(lines.next(), "URI: ")?;
        let version = field(lines.next(), "Version: ")?;
        if version != VERSION.to_string() {
            return Err(malformed("unsupported version"));
        }
        let chain_id = field(lines.next(), "Chain ID: ")?
            .parse::<u64>()
            .map_err(|_| malformed("invalid chain id"))?;
        let nonce = field(lines.next(), "Nonce: ")?;
        let issued_at = parse_timestamp(&field(lines.next(), "Issued At: ")?)?;
        let expiration = parse_timestamp(&field(lines.next(), "Expiration Time: ")?)?;

        let mut resources = Vec::new();
        if let Some(marker) = lines.next() {
            if marker != "Resources:" {
                return Err(malformed("unexpected trailing content"));
            }
            for line in lines {
                let resource = line
                    .strip_prefix("- ")
                    .ok_or_else(|| malformed("invalid resource entry"))?;
                resources.push(resource.to_owned());
            }
        }

        Ok(Self {
            domain,
            address,
            statement,
            uri,
            chain_id,
            nonce,
            issued_at,
            expiration,
            resources,
        })
    }

    /// Returns an `Ok` result if the statement has not expired at `now`,
    /// or an appropriate `Err` result otherwise.
    pub fn check_fresh(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.expiration <= now {
            return Err(Error::Expired(self.expiration));
        }
        Ok(())
    }
}

/// Renders a timestamp in the millisecond-precision RFC 3339 form wallets display.
fn render_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| malformed("invalid timestamp"))
}

fn field(line: Option<&str>, prefix: &str) -> Result<String, Error> {
    line.and_then(|line| line.strip_prefix(prefix))
        .map(str::to_owned)
        .ok_or_else(|| malformed(&format!("missing `{}` field", prefix.trim_end_matches(": "))))
}

fn expect_blank(line: Option<&str>) -> Result<(), Error> {
    match line {
        Some("") => Ok(()),
        _ => Err(malformed("missing separator line")),
    }
}

fn malformed(reason: &str) -> Error {
    Error::MalformedStatement(reason.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn example_statement(resources: Vec<String>) -> SignInStatement {
        SignInStatement {
            domain: "app.example.com".to_owned(),
            address: Address([0x11; 20]),
            statement: "Sign in to delegate signing".to_owned(),
            uri: "https://app.example.com".to_owned(),
            chain_id: 175188,
            nonce: "a1b2c3d4e5f60718".to_owned(),
            issued_at: Utc::now(),
            expiration: Utc::now() + Duration::minutes(10),
            resources,
        }
    }

    #[test]
    fn render_and_parse_round_trip_works() {
        for resources in [
            vec![],
            vec!["entrust-sign://*".to_owned()],
            vec![
                "entrust-sign://*".to_owned(),
                "entrust-exec://*".to_owned(),
            ],
        ] {
            let statement = example_statement(resources);
            let parsed = SignInStatement::parse(&statement.render()).unwrap();

            assert_eq!(parsed.domain, statement.domain);
            assert_eq!(parsed.address, statement.address);
            assert_eq!(parsed.chain_id, statement.chain_id);
            assert_eq!(parsed.nonce, statement.nonce);
            assert_eq!(parsed.resources, statement.resources);
        }
    }

    #[test]
    fn parse_rejects_malformed_statements() {
        for text in [
            "",
            "not a sign-in statement",
            "app.example.com wants you to sign in with your Ethereum account:\nnot-an-address",
        ] {
            assert!(matches!(
                SignInStatement::parse(text),
                Err(Error::MalformedStatement(_))
            ));
        }
    }

    #[test]
    fn freshness_check_works() {
        let statement = example_statement(vec![]);
        assert!(statement.check_fresh(Utc::now()).is_ok());

        // An expired statement is rejected with the expiration timestamp.
        let expired_at = statement.expiration;
        assert_eq!(
            statement.check_fresh(expired_at + Duration::seconds(1)),
            Err(Error::Expired(expired_at))
        );
    }
}
