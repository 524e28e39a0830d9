//! Authentication schemes for the request pipeline.
//!
//! Basic and bearer credentials ride on every request. Digest and NTLM are
//! challenge-response: the client sends the request, receives a 401 with a
//! `WWW-Authenticate` challenge, and replays it with the computed proof.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;
use sha2::{Digest as _, Sha256};

use crate::errors::ScanError;

type HmacMd5 = Hmac<Md5>;

const NTLM_SIGNATURE: &[u8] = b"NTLMSSP\0";
// Unicode | OEM | Request Target | NTLM | Always Sign | Extended Session Security
const NTLM_FLAGS: u32 = 0x0008_8207;

/// Parsed `--auth` credential, tagged by `--auth-type`.
#[derive(Debug, Clone)]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer { token: String },
    Digest { username: String, password: String },
    Ntlm { domain: String, username: String, password: String },
}

impl Auth {
    pub fn new(auth_type: &str, credential: &str) -> Result<Self, ScanError> {
        match auth_type.to_lowercase().as_str() {
            "bearer" | "jwt" | "oauth2" | "oath2" => Ok(Self::Bearer {
                token: credential.to_string(),
            }),
            "basic" => {
                let (username, password) = split_credential(credential);
                Ok(Self::Basic { username, password })
            }
            "digest" => {
                let (username, password) = split_credential(credential);
                Ok(Self::Digest { username, password })
            }
            "ntlm" => {
                let (account, password) = split_credential(credential);
                // DOMAIN\user or plain user
                let (domain, username) = match account.split_once('\\') {
                    Some((domain, user)) => (domain.to_string(), user.to_string()),
                    None => (String::new(), account),
                };
                Ok(Self::Ntlm {
                    domain,
                    username,
                    password,
                })
            }
            other => Err(ScanError::Config(format!(
                "Unsupported authentication type: {other}"
            ))),
        }
    }
}

/// Splits `user:pass`, tolerating colons inside the password.
fn split_credential(credential: &str) -> (String, String) {
    match credential.split_once(':') {
        Some((user, pass)) => (user.to_string(), pass.to_string()),
        None => (credential.to_string(), String::new()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Digest (RFC 7616)
// ---------------------------------------------------------------------------

/// Parses the parameter list of a `Digest ...` challenge into (key, value)
/// pairs, handling quoted values.
pub(crate) fn parse_challenge_params(challenge: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = challenge.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        rest = &rest[eq + 1..];

        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let end = stripped.find('"').unwrap_or(stripped.len());
            value = stripped[..end].to_string();
            rest = stripped.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = rest.get(end..).unwrap_or("");
        }
        rest = rest.trim_start_matches(',').trim_start();
        params.push((key, value));
    }

    params
}

fn digest_hash(algorithm: &str, data: &str) -> String {
    if algorithm.to_uppercase().starts_with("SHA-256") {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex(&hasher.finalize())
    } else {
        let mut hasher = Md5::new();
        hasher.update(data.as_bytes());
        hex(&hasher.finalize())
    }
}

/// Computes the `Authorization: Digest ...` header value answering a
/// `WWW-Authenticate: Digest ...` challenge. Returns `None` when the
/// challenge is not a digest challenge.
pub(crate) fn digest_authorization(
    challenge: &str,
    method: &str,
    uri: &str,
    username: &str,
    password: &str,
    cnonce: &str,
    nc: u32,
) -> Option<String> {
    let params = challenge.strip_prefix("Digest ")?;
    let params = parse_challenge_params(params);
    let get = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    };

    let realm = get("realm").unwrap_or("");
    let nonce = get("nonce")?;
    let opaque = get("opaque");
    let algorithm = get("algorithm").unwrap_or("MD5");
    // auth-int would require hashing the request body; plain auth is enough
    // for the probing requests this scanner sends.
    let qop = get("qop").and_then(|offered| {
        offered
            .split(',')
            .map(str::trim)
            .find(|q| *q == "auth")
            .map(str::to_string)
    });

    let mut ha1 = digest_hash(algorithm, &format!("{username}:{realm}:{password}"));
    if algorithm.to_uppercase().ends_with("-SESS") {
        ha1 = digest_hash(algorithm, &format!("{ha1}:{nonce}:{cnonce}"));
    }
    let ha2 = digest_hash(algorithm, &format!("{method}:{uri}"));

    let response = match &qop {
        Some(qop) => digest_hash(
            algorithm,
            &format!("{ha1}:{nonce}:{nc:08x}:{cnonce}:{qop}:{ha2}"),
        ),
        None => digest_hash(algorithm, &format!("{ha1}:{nonce}:{ha2}")),
    };

    let mut header = format!(
        "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", \
         uri=\"{uri}\", response=\"{response}\", algorithm={algorithm}"
    );
    if let Some(qop) = qop {
        header.push_str(&format!(", qop={qop}, nc={nc:08x}, cnonce=\"{cnonce}\""));
    }
    if let Some(opaque) = opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    Some(header)
}

// ---------------------------------------------------------------------------
// NTLM (NTLMv2, MS-NLMP)
// ---------------------------------------------------------------------------

fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn hmac_md5(key: &[u8], data: &[&[u8]]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(key).expect("HMAC accepts any key length");
    for part in data {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// NTOWFv2: the NTLMv2 hash derived from the password, user and domain.
pub(crate) fn ntowf_v2(username: &str, password: &str, domain: &str) -> [u8; 16] {
    let mut md4 = Md4::new();
    md4.update(utf16le(password));
    let nt_hash = md4.finalize();
    let identity = utf16le(&(username.to_uppercase() + domain));
    hmac_md5(&nt_hash, &[&identity])
}

fn security_buffer(buf: &mut Vec<u8>, len: usize, offset: usize) {
    buf.extend((len as u16).to_le_bytes());
    buf.extend((len as u16).to_le_bytes());
    buf.extend((offset as u32).to_le_bytes());
}

/// Type 1 message opening the NTLM exchange.
pub(crate) fn ntlm_negotiate() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend(NTLM_SIGNATURE);
    msg.extend(1u32.to_le_bytes());
    msg.extend(NTLM_FLAGS.to_le_bytes());
    security_buffer(&mut msg, 0, 32); // domain
    security_buffer(&mut msg, 0, 32); // workstation
    msg
}

/// Server challenge and target info extracted from a type 2 message.
pub(crate) struct NtlmChallenge {
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

pub(crate) fn parse_ntlm_challenge(msg: &[u8]) -> Option<NtlmChallenge> {
    if msg.len() < 48 || &msg[..8] != NTLM_SIGNATURE {
        return None;
    }
    if u32::from_le_bytes(msg[8..12].try_into().ok()?) != 2 {
        return None;
    }
    let server_challenge: [u8; 8] = msg[24..32].try_into().ok()?;
    let info_len = u16::from_le_bytes(msg[40..42].try_into().ok()?) as usize;
    let info_off = u32::from_le_bytes(msg[44..48].try_into().ok()?) as usize;
    let target_info = msg.get(info_off..info_off + info_len)?.to_vec();
    Some(NtlmChallenge {
        server_challenge,
        target_info,
    })
}

/// Type 3 message answering the challenge with LMv2/NTv2 proofs.
/// `timestamp` is in Windows FILETIME units (100 ns since 1601-01-01).
#[allow(clippy::too_many_arguments)]
pub(crate) fn ntlm_authenticate(
    challenge: &NtlmChallenge,
    domain: &str,
    username: &str,
    password: &str,
    workstation: &str,
    client_nonce: &[u8; 8],
    timestamp: u64,
) -> Vec<u8> {
    let v2_hash = ntowf_v2(username, password, domain);

    let mut blob = vec![0x01, 0x01, 0x00, 0x00, 0, 0, 0, 0];
    blob.extend(timestamp.to_le_bytes());
    blob.extend(client_nonce);
    blob.extend([0u8; 4]);
    blob.extend(&challenge.target_info);
    blob.extend([0u8; 4]);

    let nt_proof = hmac_md5(&v2_hash, &[&challenge.server_challenge, &blob]);
    let mut nt_response = nt_proof.to_vec();
    nt_response.extend(&blob);

    let lm_proof = hmac_md5(&v2_hash, &[&challenge.server_challenge, client_nonce]);
    let mut lm_response = lm_proof.to_vec();
    lm_response.extend(client_nonce);

    let domain_b = utf16le(domain);
    let user_b = utf16le(username);
    let workstation_b = utf16le(workstation);

    let base = 64usize;
    let domain_off = base;
    let user_off = domain_off + domain_b.len();
    let workstation_off = user_off + user_b.len();
    let lm_off = workstation_off + workstation_b.len();
    let nt_off = lm_off + lm_response.len();
    let key_off = nt_off + nt_response.len();

    let mut msg = Vec::with_capacity(key_off);
    msg.extend(NTLM_SIGNATURE);
    msg.extend(3u32.to_le_bytes());
    security_buffer(&mut msg, lm_response.len(), lm_off);
    security_buffer(&mut msg, nt_response.len(), nt_off);
    security_buffer(&mut msg, domain_b.len(), domain_off);
    security_buffer(&mut msg, user_b.len(), user_off);
    security_buffer(&mut msg, workstation_b.len(), workstation_off);
    security_buffer(&mut msg, 0, key_off);
    msg.extend(NTLM_FLAGS.to_le_bytes());
    msg.extend(domain_b);
    msg.extend(user_b);
    msg.extend(workstation_b);
    msg.extend(lm_response);
    msg.extend(nt_response);
    msg
}

/// `Authorization: NTLM <base64 type 1>` header value.
pub(crate) fn ntlm_negotiate_header() -> String {
    format!("NTLM {}", BASE64.encode(ntlm_negotiate()))
}

/// Decodes the `WWW-Authenticate: NTLM <base64 type 2>` challenge.
pub(crate) fn ntlm_challenge_from_header(header: &str) -> Option<NtlmChallenge> {
    let encoded = header.trim().strip_prefix("NTLM ")?.trim();
    let decoded = BASE64.decode(encoded).ok()?;
    parse_ntlm_challenge(&decoded)
}

/// `Authorization: NTLM <base64 type 3>` header value.
pub(crate) fn ntlm_authenticate_header(
    challenge: &NtlmChallenge,
    domain: &str,
    username: &str,
    password: &str,
    workstation: &str,
    client_nonce: &[u8; 8],
    timestamp: u64,
) -> String {
    let msg = ntlm_authenticate(
        challenge,
        domain,
        username,
        password,
        workstation,
        client_nonce,
        timestamp,
    );
    format!("NTLM {}", BASE64.encode(msg))
}
