//! 模块：裁决签名 (Verdict Signer)
//!
//! **签发者身份**: `did:key`，由 Ed25519 公钥直接派生：
//! multicodec 前缀 0xed 0x01 + 32 字节公钥，按 multibase `u` (base64url 无填充) 编码。
//! 验签方不需要额外的公钥分发渠道。
//!
//! **签名格式**: detached JWS。受保护头 `{alg, kid, typ, iat}` 与载荷各自
//! 规范 JSON → base64url (无填充)，签名输入是 `<header>.<payload>`；
//! 载荷不进入签名容器，验签时由 `{fingerprint, result}` 重新生成。
//! 规范 JSON = 先转成 `serde_json::Value` (对象键按字典序) 再紧凑输出，
//! 所以同一份裁决无论字段声明顺序如何，签名输入都逐字节相同。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, VerifyError};
use crate::evidence::{ConfidenceResult, Fingerprint};

pub const JWS_ALGORITHM: &str = "EdDSA";
pub const PROOF_TYPE: &str = "JWS-detached";

/// multicodec `ed25519-pub` 前缀 (varint 0xed)
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];
/// multibase `u` = base64url 无填充
const DID_KEY_PREFIX: &str = "did:key:u";

pub struct VerdictSigner {
    keypair: SigningKey,
    did: String,
}

/// detached JWS 签名容器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachedJws {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub alg: String,
    /// `<did>#key-1`
    pub kid: String,
    /// 签名时间，秒精度 UTC，同时是受保护头里的 `iat`
    pub created: String,
    /// base64url，无填充
    pub signature: String,
}

impl DetachedJws {
    /// RFC 7515 附录 F 的紧凑形式：`<header>..<signature>`
    pub fn to_compact(&self) -> Result<String> {
        Ok(format!("{}..{}", encode_segment(&self.protected_header())?, self.signature))
    }

    fn protected_header(&self) -> ProtectedHeader<'_> {
        ProtectedHeader {
            alg: &self.alg,
            kid: &self.kid,
            typ: "JWS",
            iat: &self.created,
        }
    }
}

/// 带签名的裁决
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedVerdict {
    pub fingerprint: Fingerprint,
    pub result: ConfidenceResult,
    /// 签发者 `did:key`
    pub issuer: String,
    pub proof: DetachedJws,
}

#[derive(Serialize)]
struct SignedPayload<'a> {
    fingerprint: &'a Fingerprint,
    result: &'a ConfidenceResult,
}

#[derive(Serialize)]
struct ProtectedHeader<'a> {
    alg: &'a str,
    kid: &'a str,
    typ: &'a str,
    iat: &'a str,
}

impl VerdictSigner {
    /// 临时密钥，仅用于测试或一次性进程
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(keypair: SigningKey) -> Self {
        let did = did_key(&keypair.verifying_key());
        Self { keypair, did }
    }

    /// 读取 hex 私钥文件；文件不存在时生成并写入
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let bytes = hex::decode(raw.trim())
                .map_err(|e| VerifyError::Signing(format!("invalid key file {}: {}", path.display(), e)))?;
            let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                VerifyError::Signing(format!(
                    "invalid key file {}: expected 32 bytes, got {}",
                    path.display(),
                    bytes.len()
                ))
            })?;
            let signer = Self::from_bytes(&secret);
            tracing::info!(path = %path.display(), did = %signer.did, "加载签名私钥");
            return Ok(signer);
        }

        let signer = Self::generate();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, hex::encode(signer.keypair.to_bytes()))?;
        tracing::info!(path = %path.display(), did = %signer.did, "生成新的签名私钥");
        Ok(signer)
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.keypair.verifying_key()
    }

    pub fn did(&self) -> &str {
        &self.did
    }

    /// JWS 头里的 `kid`
    pub fn key_id(&self) -> String {
        format!("{}#key-1", self.did)
    }

    pub fn sign(&self, fingerprint: &Fingerprint, result: &ConfidenceResult) -> Result<SignedVerdict> {
        self.sign_at(fingerprint, result, Utc::now())
    }

    /// 指定签名时间，便于复现
    pub fn sign_at(
        &self,
        fingerprint: &Fingerprint,
        result: &ConfidenceResult,
        created: DateTime<Utc>,
    ) -> Result<SignedVerdict> {
        let mut proof = DetachedJws {
            proof_type: PROOF_TYPE.to_string(),
            alg: JWS_ALGORITHM.to_string(),
            kid: self.key_id(),
            created: created.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            signature: String::new(),
        };
        let signing_input = signing_input(&proof, &SignedPayload { fingerprint, result })?;
        proof.signature = URL_SAFE_NO_PAD.encode(self.keypair.sign(&signing_input).to_bytes());

        Ok(SignedVerdict {
            fingerprint: fingerprint.clone(),
            result: result.clone(),
            issuer: self.did.clone(),
            proof,
        })
    }

    /// 公钥只从 `issuer` 的 did:key 解出；`kid` 必须属于同一个签发者。
    /// 需要钉死签发者时先比对 `verdict.issuer`。
    ///
    /// 格式错误 (DID、算法、编码) 返回 `Err`，签名不匹配返回 `Ok(false)`。
    pub fn verify(verdict: &SignedVerdict) -> Result<bool> {
        let proof = &verdict.proof;
        if proof.proof_type != PROOF_TYPE || proof.alg != JWS_ALGORITHM {
            return Err(VerifyError::Signing(format!(
                "unsupported proof {} / {}",
                proof.proof_type, proof.alg
            )));
        }
        if proof.kid.split('#').next() != Some(verdict.issuer.as_str()) {
            return Err(VerifyError::Signing(format!(
                "key id {} does not belong to issuer {}",
                proof.kid, verdict.issuer
            )));
        }

        let verifying_key = public_key_from_did(&verdict.issuer)?;
        let sig_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(&proof.signature)
            .map_err(|e| VerifyError::Signing(format!("invalid signature encoding: {}", e)))?
            .as_slice()
            .try_into()
            .map_err(|_| VerifyError::Signing("invalid signature length".to_string()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        let signing_input = signing_input(
            proof,
            &SignedPayload {
                fingerprint: &verdict.fingerprint,
                result: &verdict.result,
            },
        )?;
        Ok(verifying_key.verify(&signing_input, &signature).is_ok())
    }
}

/// `did:key:u7QE...`
pub fn did_key(public_key: &VerifyingKey) -> String {
    let mut bytes = ED25519_MULTICODEC.to_vec();
    bytes.extend_from_slice(public_key.as_bytes());
    format!("{}{}", DID_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

pub fn public_key_from_did(did: &str) -> Result<VerifyingKey> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| VerifyError::Signing(format!("not a base64url did:key: {}", did)))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| VerifyError::Signing(format!("invalid did:key encoding: {}", e)))?;

    let key: [u8; 32] = bytes
        .strip_prefix(&ED25519_MULTICODEC[..])
        .ok_or_else(|| VerifyError::Signing("did:key is not an Ed25519 key".to_string()))?
        .try_into()
        .map_err(|_| VerifyError::Signing(format!("invalid did:key length: {}", bytes.len())))?;
    VerifyingKey::from_bytes(&key).map_err(|e| VerifyError::Signing(format!("invalid public key: {}", e)))
}

/// 键排序、无空白的 JSON 字节
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(canonical_json(value)?))
}

fn signing_input(proof: &DetachedJws, payload: &SignedPayload<'_>) -> Result<Vec<u8>> {
    Ok(format!(
        "{}.{}",
        encode_segment(&proof.protected_header())?,
        encode_segment(payload)?
    )
    .into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringThresholds;
    use crate::evidence::{DerivedMetadata, MediaKind};
    use crate::scoring::{ConfidenceScoringEngine, VerificationBundle};
    use chrono::TimeZone;

    fn verdict() -> (Fingerprint, ConfidenceResult) {
        let fingerprint = Fingerprint {
            algorithm: "sha256".into(),
            primary_hash: "ab".repeat(32),
            perceptual: Some("AAAAAAAAAAA=".into()),
            media_kind: MediaKind::Image,
            canonicalization: "none".into(),
            perceptual_robust: true,
            metadata: DerivedMetadata::default(),
        };
        let engine = ConfidenceScoringEngine::new(ScoringThresholds::default()).unwrap();
        let result = engine.calculate(&VerificationBundle::new(MediaKind::Image, Utc::now()));
        (fingerprint, result)
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn did_key_round_trips_the_public_key() {
        let signer = VerdictSigner::from_bytes(&[7u8; 32]);
        // 0xed 0x01 前缀编码后一律是 "7QE"
        assert!(signer.did().starts_with("did:key:u7QE"), "{}", signer.did());
        assert_eq!(public_key_from_did(signer.did()).unwrap(), signer.public_key());
        assert_eq!(signer.key_id(), format!("{}#key-1", signer.did()));

        assert!(public_key_from_did("did:web:example.com").is_err());
    }

    #[test]
    fn signed_verdict_carries_a_detached_jws() {
        let signer = VerdictSigner::generate();
        let (fingerprint, result) = verdict();
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        let signed = signer.sign_at(&fingerprint, &result, created).unwrap();

        assert_eq!(signed.issuer, signer.did());
        assert_eq!(signed.proof.proof_type, "JWS-detached");
        assert_eq!(signed.proof.alg, "EdDSA");
        assert_eq!(signed.proof.kid, signer.key_id());
        assert_eq!(signed.proof.created, "2024-06-01T09:30:00Z");

        // 受保护头可以从紧凑形式里解回来，载荷段为空
        let compact = signed.proof.to_compact().unwrap();
        let (header, rest) = compact.split_once("..").unwrap();
        assert_eq!(rest, signed.proof.signature);
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();
        assert_eq!(header["kid"], signer.key_id().as_str());
        assert_eq!(header["iat"], "2024-06-01T09:30:00Z");
        assert_eq!(header["typ"], "JWS");

        assert!(VerdictSigner::verify(&signed).unwrap());
    }

    #[test]
    fn tampering_is_detected() {
        let signer = VerdictSigner::generate();
        let (fingerprint, result) = verdict();
        let signed = signer.sign(&fingerprint, &result).unwrap();

        let mut changed_result = signed.clone();
        changed_result.result.percentage = 99;
        assert!(!VerdictSigner::verify(&changed_result).unwrap());

        // iat 在受保护头里，改签名时间同样失效
        let mut backdated = signed.clone();
        backdated.proof.created = "2000-01-01T00:00:00Z".into();
        assert!(!VerdictSigner::verify(&backdated).unwrap());
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let (fingerprint, result) = verdict();
        let mut signed = VerdictSigner::generate().sign(&fingerprint, &result).unwrap();
        let other = VerdictSigner::generate();

        // 冒用他人 DID：kid 对不上
        signed.issuer = other.did().to_string();
        assert_eq!(VerdictSigner::verify(&signed).unwrap_err().kind(), "signing_error");

        // kid 也一起换掉：签名对不上
        signed.proof.kid = other.key_id();
        assert!(!VerdictSigner::verify(&signed).unwrap());
    }

    #[test]
    fn malformed_signature_is_an_error() {
        let signer = VerdictSigner::generate();
        let (fingerprint, result) = verdict();
        let mut signed = signer.sign(&fingerprint, &result).unwrap();
        signed.proof.signature = "!!".into();
        assert_eq!(VerdictSigner::verify(&signed).unwrap_err().kind(), "signing_error");
    }

    #[test]
    fn load_or_generate_persists_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("verdict.key");

        let first = VerdictSigner::load_or_generate(&path).unwrap();
        assert!(path.exists());
        let second = VerdictSigner::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(first.did(), second.did());
    }

    #[test]
    fn corrupt_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdict.key");
        std::fs::write(&path, "deadbeef").unwrap();
        assert!(VerdictSigner::load_or_generate(&path).is_err());
    }
}
