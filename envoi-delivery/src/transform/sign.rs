//! DKIM signing (RFC 6376) with relaxed/relaxed canonicalization.
//!
//! The private key is fetched by running the domain's key command, so it is
//! never stored in the configuration.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use envoi_common::{
    DomainConfig, ParsedMessage, command::CommandRunner, command::capture, internal,
};
use ring::signature::Ed25519KeyPair;
use rsa::{
    RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    sha2::Sha256,
    signature::{SignatureEncoding, Signer},
};
use rustls_pki_types::PrivateKeyDer;

use super::canon::{relaxed_body, relaxed_header, select_headers};
use crate::DeliveryError;

/// Headers that are signed whenever the message carries them.
const SIGNED_HEADERS: [&str; 28] = [
    "from",
    "sender",
    "reply-to",
    "subject",
    "date",
    "message-id",
    "to",
    "cc",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
    "content-id",
    "content-description",
    "resent-date",
    "resent-from",
    "resent-sender",
    "resent-to",
    "resent-cc",
    "resent-message-id",
    "in-reply-to",
    "references",
    "list-id",
    "list-help",
    "list-unsubscribe",
    "list-subscribe",
    "list-post",
    "list-owner",
    "list-archive",
];

/// A private signing key.
///
/// RSA keys of any size the `rsa` crate accepts are usable, 1024-bit
/// included.
pub enum DkimKey {
    Rsa(Box<SigningKey<Sha256>>),
    Ed25519(Ed25519KeyPair),
}

impl std::fmt::Debug for DkimKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DkimKey").field(&self.algorithm()).finish()
    }
}

fn key_err(err: impl std::fmt::Display) -> DeliveryError {
    DeliveryError::Sign(format!("could not parse DKIM key: {err}"))
}

impl DkimKey {
    /// Load a PEM-encoded key. A PKCS#8 key may be RSA or Ed25519; a
    /// PKCS#1 key is RSA.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Sign`] if the input is not PEM or holds no
    /// usable key.
    pub fn from_pem(pem: &[u8]) -> Result<Self, DeliveryError> {
        let der = rustls_pemfile::private_key(&mut &pem[..])
            .map_err(|err| DeliveryError::Sign(format!("could not decode DKIM key: {err}")))?
            .ok_or_else(|| DeliveryError::Sign("no private key in DKIM key output".to_string()))?;

        match der {
            PrivateKeyDer::Pkcs8(der) => {
                let der = der.secret_pkcs8_der();
                match RsaPrivateKey::from_pkcs8_der(der) {
                    Ok(key) => Ok(Self::from_rsa(key)),
                    Err(rsa_err) => Ed25519KeyPair::from_pkcs8_maybe_unchecked(der)
                        .map(Self::Ed25519)
                        .map_err(|err| key_err(format!("not RSA ({rsa_err}) nor Ed25519 ({err})"))),
                }
            }
            PrivateKeyDer::Pkcs1(der) => RsaPrivateKey::from_pkcs1_der(der.secret_pkcs1_der())
                .map(Self::from_rsa)
                .map_err(key_err),
            _ => Err(key_err("unsupported key format")),
        }
    }

    fn from_rsa(key: RsaPrivateKey) -> Self {
        Self::Rsa(Box::new(SigningKey::<Sha256>::new(key)))
    }

    /// The `a=` tag value for this key.
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        match self {
            Self::Rsa(_) => "rsa-sha256",
            Self::Ed25519(_) => "ed25519-sha256",
        }
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, DeliveryError> {
        match self {
            Self::Rsa(key) => key
                .try_sign(data)
                .map(|sig| sig.to_vec())
                .map_err(|err| DeliveryError::Sign(format!("RSA signing failed: {err}"))),
            Self::Ed25519(key) => Ok(key.sign(data).as_ref().to_vec()),
        }
    }
}

/// Signs messages for one domain with one key.
#[derive(Debug)]
pub struct DkimSigner {
    key: DkimKey,
    domain: String,
    selector: String,
}

impl DkimSigner {
    #[must_use]
    pub fn new(key: DkimKey, domain: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            key,
            domain: domain.into(),
            selector: selector.into(),
        }
    }

    /// The `DKIM-Signature` field for `message`, including the trailing
    /// CRLF. The header list holds each allow-listed header once per
    /// occurrence, in message order.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Sign`] if the signing operation fails.
    pub fn signature(&self, message: &ParsedMessage) -> Result<String, DeliveryError> {
        let bytes = message.bytes();
        let fields: Vec<(String, &[u8])> = message
            .header_fields()
            .into_iter()
            .map(|field| (field.name.to_ascii_lowercase(), &bytes[field.range]))
            .collect();

        let signed: Vec<String> = fields
            .iter()
            .filter(|(name, _)| SIGNED_HEADERS.contains(&name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();

        let body_hash = ring::digest::digest(&ring::digest::SHA256, &relaxed_body(message.body()));

        let value = format!(
            " v=1; a={}; c=relaxed/relaxed; d={}; s={};\r\n\th={};\r\n\tbh={};\r\n\tb=",
            self.key.algorithm(),
            self.domain,
            self.selector,
            signed.join(":"),
            BASE64.encode(body_hash.as_ref()),
        );

        let mut input = select_headers(&signed, &fields);
        let mut template = relaxed_header(format!("DKIM-Signature:{value}").as_bytes());
        template.truncate(template.len() - 2);
        input.extend_from_slice(&template);

        let sig = self.key.sign(&input)?;
        Ok(format!("DKIM-Signature:{value}{}\r\n", BASE64.encode(sig)))
    }

    /// Prepend a `DKIM-Signature` field to `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails or the signed message cannot be
    /// re-read.
    pub fn sign(&self, message: &mut ParsedMessage) -> Result<(), DeliveryError> {
        let mut signed = self.signature(message)?.into_bytes();
        signed.extend_from_slice(message.bytes());
        message.replace_bytes(signed)?;
        Ok(())
    }
}

/// DKIM sign `message` as its source domain, fetching the key with the
/// configured key command.
///
/// # Errors
///
/// Returns [`DeliveryError::Sign`] if no key command is configured, the
/// command fails, or its output is not a usable key.
pub async fn sign(
    message: &mut ParsedMessage,
    config: &DomainConfig,
    runner: &dyn CommandRunner,
) -> Result<(), DeliveryError> {
    let command = config
        .dkim_key_cmd
        .as_deref()
        .ok_or_else(|| DeliveryError::Sign("no DKIM key command configured".to_string()))?;

    let pem = capture(runner, command)
        .await
        .map_err(|err| DeliveryError::Sign(format!("could not retrieve DKIM key: {err}")))?;
    let key = DkimKey::from_pem(&pem)?;

    internal!(
        level = DEBUG,
        "Signing message {} for {} with {} selector {}",
        message.hash(),
        message.source_domain(),
        key.algorithm(),
        config.dkim_selector
    );

    DkimSigner::new(key, message.source_domain(), &config.dkim_selector).sign(message)
}
