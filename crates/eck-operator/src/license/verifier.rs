//! Signing and verification of licenses.
//!
//! A signature is the base64 encoding of
//!
//! ```text
//! u32 version | u32 magic length | magic | u32 hash length | hash | u32 sig length | sig
//! ```
//!
//! with all integers big-endian. `sig` is a PKCS#1 v1.5 SHA-512 signature over
//! the JSON rendering of a fixed subset of the license fields, see
//! [`signable_content`].
use base64::{Engine, engine::general_purpose::STANDARD};
use jiff::Timestamp;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePublicKey, EncodePublicKey, spki},
    signature::{SignatureEncoding, Signer as _, Verifier as _},
};
use serde::Serialize;
use sha2::Sha512;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use strum::Display;

use super::model::{LicenseSpec, LicenseType};

const MAGIC_LEN: usize = 13;

/// Key size of the keys generated for trials.
pub const TRIAL_KEY_BITS: usize = 2048;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to base64 decode the signature"))]
    DecodeEnvelope { source: base64::DecodeError },

    #[snafu(display("failed to render the signed license fields"))]
    RenderContent { source: serde_json::Error },

    #[snafu(display("{field} length {len} exceeds the signature length {max}"))]
    Bounds {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[snafu(display("signature ends before its {field}"))]
    Truncated { field: &'static str },

    #[snafu(display("malformed RSA signature"))]
    MalformedSignature { source: rsa::signature::Error },

    #[snafu(display("license signature does not match"))]
    SignatureMismatch { source: rsa::signature::Error },

    #[snafu(display("failed to sign license"))]
    Sign { source: rsa::signature::Error },

    #[snafu(display("failed to generate RSA key"))]
    GenerateKey { source: rsa::Error },

    #[snafu(display("failed to encode public key"))]
    EncodePublicKey { source: spki::Error },

    #[snafu(display("failed to decode public key"))]
    DecodePublicKey { source: spki::Error },
}

/// Why a signature did not verify.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ErrorKind {
    Malformed,
    Bounds,
    SignatureMismatch,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bounds { .. } => ErrorKind::Bounds,
            Self::Truncated { .. } => ErrorKind::Io,
            Self::SignatureMismatch { .. } => ErrorKind::SignatureMismatch,
            Self::DecodeEnvelope { .. }
            | Self::RenderContent { .. }
            | Self::MalformedSignature { .. }
            | Self::Sign { .. }
            | Self::GenerateKey { .. }
            | Self::EncodePublicKey { .. }
            | Self::DecodePublicKey { .. } => ErrorKind::Malformed,
        }
    }
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum LicenseStatus {
    Valid,
    Expired,
    Invalid,
}

#[derive(Serialize)]
struct SignableContent<'a> {
    uid: &'a str,
    #[serde(rename = "type")]
    license_type: LicenseType,
    #[serde(skip_serializing_if = "is_zero")]
    issue_date_in_millis: i64,
    #[serde(skip_serializing_if = "is_zero")]
    start_date_in_millis: i64,
    #[serde(skip_serializing_if = "is_zero")]
    expiry_date_in_millis: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_instances: Option<u32>,
    issued_to: &'a str,
    issuer: &'a str,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// The bytes covered by the signature of `spec`. No other field of the license
/// takes part in the signature.
pub fn signable_content(spec: &LicenseSpec) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(&SignableContent {
        uid: &spec.uid,
        license_type: spec.license_type,
        issue_date_in_millis: spec.issue_date_in_millis,
        start_date_in_millis: spec.start_date_in_millis,
        expiry_date_in_millis: spec.expiry_date_in_millis,
        max_instances: spec.max_instances.filter(|max| *max != 0),
        issued_to: &spec.issued_to,
        issuer: &spec.issuer,
    })
    .context(RenderContentSnafu)
}

/// Reads the length-prefixed chunks of a decoded signature.
struct Envelope<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Envelope<'a> {
    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], Error> {
        let chunk = self
            .bytes
            .get(self.pos..self.pos.saturating_add(len))
            .context(TruncatedSnafu { field })?;
        self.pos += len;
        Ok(chunk)
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, Error> {
        let chunk = self.take(4, field)?;
        Ok(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    fn read_chunk(&mut self, field: &'static str) -> Result<&'a [u8], Error> {
        let len = self.read_u32(field)? as usize;
        let max = self.bytes.len();
        ensure!(len <= max, BoundsSnafu { field, len, max });
        self.take(len, field)
    }
}

/// Checks license signatures against a trusted public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verifier {
    public_key: RsaPublicKey,
}

impl Verifier {
    pub fn new(public_key: RsaPublicKey) -> Self {
        Self { public_key }
    }

    /// Creates a verifier from a PKIX (SubjectPublicKeyInfo) DER encoded key.
    pub fn from_public_key_der(der: &[u8]) -> Result<Self, Error> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self::new)
            .context(DecodePublicKeySnafu)
    }

    pub fn public_key_der(&self) -> Result<Vec<u8>, Error> {
        Ok(self
            .public_key
            .to_public_key_der()
            .context(EncodePublicKeySnafu)?
            .into_vec())
    }

    /// Checks that `spec.signature` is a signature of `spec` by our key.
    pub fn verify(&self, spec: &LicenseSpec) -> Result<(), Error> {
        let bytes = STANDARD
            .decode(spec.signature.as_bytes())
            .context(DecodeEnvelopeSnafu)?;
        let mut envelope = Envelope {
            bytes: &bytes,
            pos: 0,
        };

        let _version = envelope.read_u32("version")?;
        let _magic = envelope.read_chunk("magic")?;
        let _hash = envelope.read_chunk("hash")?;
        let signature = envelope.read_chunk("signature")?;

        let signature = Signature::try_from(signature).context(MalformedSignatureSnafu)?;
        VerifyingKey::<Sha512>::new(self.public_key.clone())
            .verify(&signable_content(spec)?, &signature)
            .context(SignatureMismatchSnafu)
    }

    /// Classifies `spec` at `now`: invalid if the signature does not verify,
    /// expired outside of its validity window, valid otherwise.
    pub fn status(&self, spec: &LicenseSpec, now: Timestamp) -> LicenseStatus {
        if let Err(error) = self.verify(spec) {
            tracing::warn!(
                license.uid = %spec.uid,
                error = &error as &dyn std::error::Error,
                "license signature check failed"
            );
            return LicenseStatus::Invalid;
        }
        if spec.is_valid_at(now) {
            LicenseStatus::Valid
        } else {
            LicenseStatus::Expired
        }
    }
}

/// Signs licenses, used for self-generated trials.
#[derive(Clone, Debug)]
pub struct Signer {
    private_key: RsaPrivateKey,
    verifier: Verifier,
}

impl Signer {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        let verifier = Verifier::new(private_key.to_public_key());
        Self {
            private_key,
            verifier,
        }
    }

    /// Generates a fresh key pair of `bits` bits.
    pub fn generate(bits: usize) -> Result<Self, Error> {
        RsaPrivateKey::new(&mut rand_core::OsRng, bits)
            .map(Self::new)
            .context(GenerateKeySnafu)
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// The signature of `spec`, to be stored in its `signature` field.
    pub fn sign(&self, spec: &LicenseSpec) -> Result<String, Error> {
        let signature = SigningKey::<Sha512>::new(self.private_key.clone())
            .try_sign(&signable_content(spec)?)
            .context(SignSnafu)?
            .to_vec();
        let magic = rand::random::<[u8; MAGIC_LEN]>();
        let hash = STANDARD.encode(self.verifier.public_key_der()?);

        let mut envelope =
            Vec::with_capacity(4 + 4 + MAGIC_LEN + 4 + hash.len() + 4 + signature.len());
        envelope.extend_from_slice(&spec.version.to_be_bytes());
        for chunk in [&magic[..], hash.as_bytes(), &signature] {
            envelope.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            envelope.extend_from_slice(chunk);
        }
        Ok(STANDARD.encode(envelope))
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{testing::SIGNER, *};

    fn ms(s: &str) -> i64 {
        s.parse::<Timestamp>().unwrap().as_millisecond()
    }

    fn spec() -> LicenseSpec {
        LicenseSpec {
            uid: "57E312E2-6EA0-49D0-8E65-AA5017742ACF".to_owned(),
            license_type: LicenseType::Enterprise,
            issue_date_in_millis: ms("2019-01-01T00:00:00Z"),
            start_date_in_millis: ms("2019-01-01T00:00:00Z"),
            expiry_date_in_millis: ms("2019-12-31T00:00:00Z"),
            max_instances: Some(40),
            issued_to: "test org <ops@example.com> & co".to_owned(),
            issuer: "test issuer".to_owned(),
            ..LicenseSpec::default()
        }
    }

    fn signed() -> LicenseSpec {
        let mut spec = spec();
        spec.signature = SIGNER.sign(&spec).unwrap();
        spec
    }

    #[test]
    fn signable_content_is_unescaped_and_ordered() {
        let content = String::from_utf8(signable_content(&spec()).unwrap()).unwrap();
        assert_eq!(
            content,
            format!(
                r#"{{"uid":"57E312E2-6EA0-49D0-8E65-AA5017742ACF","type":"enterprise","issue_date_in_millis":{d},"start_date_in_millis":{d},"expiry_date_in_millis":{e},"max_instances":40,"issued_to":"test org <ops@example.com> & co","issuer":"test issuer"}}"#,
                d = ms("2019-01-01T00:00:00Z"),
                e = ms("2019-12-31T00:00:00Z"),
            )
        );
    }

    #[test]
    fn signed_license_verifies() {
        SIGNER.verifier().verify(&signed()).unwrap();
    }

    #[rstest]
    #[case::uid(|s: &mut LicenseSpec| s.uid.push('x'))]
    #[case::issued_to(|s: &mut LicenseSpec| s.issued_to = "test orh <ops@example.com> & co".to_owned())]
    #[case::issuer(|s: &mut LicenseSpec| s.issuer.clear())]
    #[case::license_type(|s: &mut LicenseSpec| s.license_type = LicenseType::Platinum)]
    #[case::expiry(|s: &mut LicenseSpec| s.expiry_date_in_millis += 1)]
    #[case::max_instances(|s: &mut LicenseSpec| s.max_instances = Some(41))]
    fn tampering_with_signed_fields_breaks_the_signature(#[case] tamper: fn(&mut LicenseSpec)) {
        let mut license = signed();
        tamper(&mut license);

        let err = SIGNER.verifier().verify(&license).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    }

    #[test]
    fn unsigned_fields_do_not_matter() {
        let mut license = signed();
        license.max_nodes = Some(3);
        SIGNER.verifier().verify(&license).unwrap();
    }

    #[test]
    fn other_key_does_not_verify() {
        let other = Signer::generate(1024).unwrap();
        let err = other.verifier().verify(&signed()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    }

    fn envelope(chunks: &[&[u8]]) -> String {
        let mut bytes = 5u32.to_be_bytes().to_vec();
        for chunk in chunks {
            bytes.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
            bytes.extend_from_slice(chunk);
        }
        STANDARD.encode(bytes)
    }

    #[rstest]
    #[case::not_base64("%%%".to_owned(), ErrorKind::Malformed)]
    #[case::empty(String::new(), ErrorKind::Io)]
    #[case::truncated_magic(envelope(&[b"magic"])[..12].to_owned(), ErrorKind::Io)]
    #[case::missing_signature(envelope(&[b"magic", b"hash"]), ErrorKind::Io)]
    #[case::oversized_length(
        STANDARD.encode([0, 0, 0, 1, 0xff, 0xff, 0xff, 0xff]),
        ErrorKind::Bounds
    )]
    fn broken_envelopes_are_classified(#[case] signature: String, #[case] kind: ErrorKind) {
        let license = LicenseSpec {
            signature,
            ..spec()
        };
        let err = SIGNER.verifier().verify(&license).unwrap_err();
        assert_eq!(err.kind(), kind);
    }

    #[rstest]
    #[case::valid("2019-02-01T00:00:00Z", LicenseStatus::Valid)]
    #[case::not_yet_started("2018-12-01T00:00:00Z", LicenseStatus::Expired)]
    #[case::expired("2020-02-01T00:00:00Z", LicenseStatus::Expired)]
    fn status_follows_validity_window(#[case] now: &str, #[case] status: LicenseStatus) {
        let now = now.parse().unwrap();
        assert_eq!(SIGNER.verifier().status(&signed(), now), status);
    }

    #[test]
    fn tampered_license_is_invalid_even_when_expired() {
        let mut license = signed();
        license.issued_to.push('!');
        let now = "2020-02-01T00:00:00Z".parse().unwrap();
        assert_eq!(SIGNER.verifier().status(&license, now), LicenseStatus::Invalid);
    }

    #[test]
    fn public_key_round_trips_through_der() {
        let der = SIGNER.verifier().public_key_der().unwrap();
        let verifier = Verifier::from_public_key_der(&der).unwrap();
        verifier.verify(&signed()).unwrap();
    }
}
