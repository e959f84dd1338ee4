// Developer-portal API key provisioning.
//
// API keys are bound to the caller's public IP. With portal credentials we
// log in, learn our IP from the temporary session token, and make sure enough
// keys with our configured name exist for that IP.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::UpstreamError;

/// Accounts may hold at most this many keys.
pub const MAX_KEYS_PER_ACCOUNT: usize = 10;

const KEY_DESCRIPTION: &str = "Created by cwl-status";

// ── Wire types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    temporary_api_token: String,
}

#[derive(Deserialize)]
struct KeyList {
    #[serde(default)]
    keys: Vec<ApiKey>,
}

/// A key as listed by the developer portal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub cidr_ranges: Vec<String>,
}

impl ApiKey {
    fn allows(&self, ip: &str) -> bool {
        self.cidr_ranges
            .iter()
            .any(|range| range.split('/').next() == Some(ip))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest<'a> {
    name: &'a str,
    description: &'a str,
    cidr_ranges: Vec<String>,
    scopes: Vec<&'a str>,
}

#[derive(Deserialize)]
struct CreateKeyResponse {
    key: ApiKey,
}

#[derive(Serialize)]
struct RevokeKeyRequest<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct TokenClaims {
    #[serde(default)]
    limits: Vec<TokenLimit>,
}

#[derive(Deserialize)]
struct TokenLimit {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    cidrs: Vec<String>,
}

// ── Key planning ──────────────────────────────────────────────────────

/// What to do with the account's keys to end up with `wanted` usable ones.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct KeyPlan {
    /// Existing key strings that already work from our IP.
    pub reuse: Vec<String>,
    /// Ids of keys with our name that are bound to another IP.
    pub revoke: Vec<String>,
    /// Number of new keys to create.
    pub create: usize,
}

pub fn plan_keys(existing: &[ApiKey], name: &str, ip: &str, wanted: usize) -> KeyPlan {
    let ours: Vec<&ApiKey> = existing.iter().filter(|k| k.name == name).collect();

    let reuse: Vec<String> = ours
        .iter()
        .filter(|k| k.allows(ip))
        .take(wanted)
        .map(|k| k.key.clone())
        .collect();

    let revoke: Vec<String> = ours
        .iter()
        .filter(|k| !k.allows(ip))
        .map(|k| k.id.clone())
        .collect();

    let kept = existing.len() - revoke.len();
    let capacity = MAX_KEYS_PER_ACCOUNT.saturating_sub(kept);
    let create = wanted.saturating_sub(reuse.len()).min(capacity);

    KeyPlan {
        reuse,
        revoke,
        create,
    }
}

/// Extract the caller's IP from the portal's temporary session token.
///
/// The token is only read, never trusted for anything else, so its
/// signature is not checked.
pub fn client_ip_from_token(token: &str) -> Result<String, UpstreamError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| UpstreamError::Auth(format!("unreadable session token: {e}")))?;

    let limits = &data.claims.limits;
    limits
        .iter()
        .find(|l| l.kind == "client" && !l.cidrs.is_empty())
        .or_else(|| limits.iter().find(|l| !l.cidrs.is_empty()))
        .and_then(|l| l.cidrs.first())
        .and_then(|cidr| cidr.split('/').next())
        .map(str::to_string)
        .ok_or_else(|| UpstreamError::Auth("session token carries no client IP".into()))
}

// ── Portal session ────────────────────────────────────────────────────

/// A logged-in developer-portal session. Holds its own cookie jar.
pub struct PortalSession {
    http: reqwest::Client,
    base_url: String,
}

impl PortalSession {
    pub async fn login(
        http: reqwest::Client,
        base_url: &str,
        email: &str,
        password: &str,
    ) -> Result<(Self, String), UpstreamError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let response = http
            .post(format!("{base_url}/api/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::Auth(format!(
                "developer portal login returned {}",
                response.status()
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        let ip = client_ip_from_token(&login.temporary_api_token)?;

        Ok((Self { http, base_url }, ip))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, UpstreamError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::Auth(format!(
                "developer portal {path} returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    pub async fn list_keys(&self) -> Result<Vec<ApiKey>, UpstreamError> {
        let list: KeyList = self.post("/api/apikey/list", &serde_json::json!({})).await?;
        Ok(list.keys)
    }

    pub async fn create_key(&self, name: &str, ip: &str) -> Result<ApiKey, UpstreamError> {
        let request = CreateKeyRequest {
            name,
            description: KEY_DESCRIPTION,
            cidr_ranges: vec![ip.to_string()],
            scopes: vec!["clash"],
        };
        let created: CreateKeyResponse = self.post("/api/apikey/create", &request).await?;
        Ok(created.key)
    }

    pub async fn revoke_key(&self, id: &str) -> Result<(), UpstreamError> {
        let _: serde_json::Value = self.post("/api/apikey/revoke", &RevokeKeyRequest { id }).await?;
        Ok(())
    }

    /// Bring the account to `wanted` usable keys for `ip` and return them.
    pub async fn provision(
        &self,
        name: &str,
        ip: &str,
        wanted: usize,
    ) -> Result<Vec<String>, UpstreamError> {
        let existing = self.list_keys().await?;
        let plan = plan_keys(&existing, name, ip, wanted);
        tracing::debug!(
            reuse = plan.reuse.len(),
            revoke = plan.revoke.len(),
            create = plan.create,
            "Planned API keys for {ip}"
        );

        for id in &plan.revoke {
            self.revoke_key(id).await?;
        }

        let mut keys = plan.reuse;
        for _ in 0..plan.create {
            keys.push(self.create_key(name, ip).await?.key);
        }

        if keys.is_empty() {
            return Err(UpstreamError::Auth(format!(
                "no API key available for {ip}; the account already holds {MAX_KEYS_PER_ACCOUNT} keys"
            )));
        }
        Ok(keys)
    }

    pub async fn logout(&self) -> Result<(), UpstreamError> {
        self.http
            .post(format!("{}/api/logout", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn key(id: &str, name: &str, cidr: &str) -> ApiKey {
        ApiKey {
            id: id.into(),
            name: name.into(),
            key: format!("key-{id}"),
            cidr_ranges: vec![cidr.into()],
        }
    }

    #[test]
    fn test_plan_reuses_matching_keys() {
        let existing = vec![key("1", "cwl", "1.2.3.4"), key("2", "other", "1.2.3.4")];
        let plan = plan_keys(&existing, "cwl", "1.2.3.4", 1);
        assert_eq!(plan.reuse, vec!["key-1"]);
        assert!(plan.revoke.is_empty());
        assert_eq!(plan.create, 0);
    }

    #[test]
    fn test_plan_accepts_cidr_suffix() {
        let existing = vec![key("1", "cwl", "1.2.3.4/32")];
        let plan = plan_keys(&existing, "cwl", "1.2.3.4", 1);
        assert_eq!(plan.reuse, vec!["key-1"]);
    }

    #[test]
    fn test_plan_revokes_stale_keys_and_creates() {
        let existing = vec![key("1", "cwl", "9.9.9.9"), key("2", "other", "9.9.9.9")];
        let plan = plan_keys(&existing, "cwl", "1.2.3.4", 2);
        assert!(plan.reuse.is_empty());
        assert_eq!(plan.revoke, vec!["1"]);
        assert_eq!(plan.create, 2);
    }

    #[test]
    fn test_plan_respects_account_limit() {
        let existing: Vec<ApiKey> = (0..9)
            .map(|i| key(&i.to_string(), "someone-else", "9.9.9.9"))
            .collect();
        let plan = plan_keys(&existing, "cwl", "1.2.3.4", 5);
        assert_eq!(plan.create, 1);
    }

    #[test]
    fn test_plan_full_account_creates_nothing() {
        let existing: Vec<ApiKey> = (0..10)
            .map(|i| key(&i.to_string(), "someone-else", "9.9.9.9"))
            .collect();
        let plan = plan_keys(&existing, "cwl", "1.2.3.4", 1);
        assert_eq!(plan, KeyPlan::default());
    }

    #[test]
    fn test_client_ip_from_token() {
        let claims = serde_json::json!({
            "iss": "supercell",
            "limits": [
                {"tier": "developer/bronze", "type": "throttling"},
                {"cidrs": ["203.0.113.7/32"], "type": "client"}
            ]
        });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"not-ours"),
        )
        .unwrap();

        assert_eq!(client_ip_from_token(&token).unwrap(), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_missing() {
        let token = encode(
            &Header::default(),
            &serde_json::json!({"limits": []}),
            &EncodingKey::from_secret(b"x"),
        )
        .unwrap();
        assert!(matches!(
            client_ip_from_token(&token),
            Err(UpstreamError::Auth(_))
        ));
    }
}
