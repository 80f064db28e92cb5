//! The in-memory instance registry.
//!
//! Instances are loaded once at startup and added at runtime via the private API; they are never removed while the
//! server runs, so lookups hand out `Arc`s that stay valid for the life of the process. Each instance owns its
//! EdDSA signing key (zeroized on drop) and the salted wire-method table derived from its bank accounts.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use ed25519_dalek::{SigningKey, VerifyingKey};
use log::*;
use mpg_common::Secret;
use rand::rngs::OsRng;
use serde_json::json;
use sha2::{Digest, Sha256};

use merchant_payment_engine::db_types::{InstanceAccountRow, InstanceRow};

use crate::errors::ServerError;

/// A bank account of an instance together with the salted hash that binds it into contracts.
#[derive(Debug, Clone)]
pub struct WireMethod {
    pub payto_uri: String,
    /// Payment method, as derived from the payto URI authority (`payto://iban/...` has method `iban`).
    pub method: String,
    pub salt: String,
    pub h_wire: String,
    pub active: bool,
}

impl WireMethod {
    /// Create a wire method for a payto URI, generating a fresh salt.
    pub fn from_payto(payto_uri: &str) -> Result<Self, ServerError> {
        let method = method_from_payto(payto_uri)?;
        let salt = hex::encode(rand::random::<[u8; 32]>());
        let h_wire = salted_wire_hash(payto_uri, &salt);
        Ok(Self { payto_uri: payto_uri.to_string(), method, salt, h_wire, active: true })
    }

    pub fn from_account_row(row: &InstanceAccountRow) -> Self {
        Self {
            payto_uri: row.payto_uri.clone(),
            method: row.method.clone(),
            salt: row.salt.clone(),
            h_wire: row.h_wire.clone(),
            active: row.active,
        }
    }

    pub fn to_account_row(&self) -> InstanceAccountRow {
        InstanceAccountRow {
            payto_uri: self.payto_uri.clone(),
            method: self.method.clone(),
            salt: self.salt.clone(),
            h_wire: self.h_wire.clone(),
            active: self.active,
        }
    }
}

/// Extract the payment method from a payto URI. `payto://iban/DE1234` yields `iban`.
pub fn method_from_payto(payto_uri: &str) -> Result<String, ServerError> {
    let rest = payto_uri
        .strip_prefix("payto://")
        .ok_or_else(|| ServerError::ParameterMalformed(format!("not a payto URI: {payto_uri}")))?;
    let method = rest.split('/').next().unwrap_or_default();
    if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ServerError::ParameterMalformed(format!("payto URI has no valid method: {payto_uri}")));
    }
    Ok(method.to_ascii_lowercase())
}

/// The salted hash over the account details that contracts commit to. Salting keeps the bank account confidential
/// until the merchant chooses to reveal it.
pub fn salted_wire_hash(payto_uri: &str, salt: &str) -> String {
    let canonical = json!({ "payto_uri": payto_uri, "salt": salt }).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// A merchant instance: one tenant of this gateway, with its own signing key, bank accounts and tipping reserve.
pub struct MerchantInstance {
    pub id: String,
    pub name: String,
    // SigningKey zeroizes its seed on drop.
    signing_key: Secret<SigningKey>,
    pub merchant_pub: VerifyingKey,
    pub tip_exchange: Option<String>,
    tip_reserve_priv: Option<Secret<String>>,
    pub wire_methods: Vec<WireMethod>,
}

impl std::fmt::Debug for MerchantInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantInstance")
            .field("id", &self.id)
            .field("merchant_pub", &self.merchant_pub_hex())
            .field("accounts", &self.wire_methods.len())
            .finish()
    }
}

impl MerchantInstance {
    /// Create a brand-new instance with a freshly generated signing key.
    pub fn create(
        id: &str,
        name: &str,
        payto_uris: &[String],
        tip_exchange: Option<String>,
        tip_reserve_priv: Option<Secret<String>>,
    ) -> Result<Self, ServerError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let merchant_pub = signing_key.verifying_key();
        let wire_methods = payto_uris.iter().map(|uri| WireMethod::from_payto(uri)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            signing_key: Secret::new(signing_key),
            merchant_pub,
            tip_exchange,
            tip_reserve_priv,
            wire_methods,
        })
    }

    /// Reconstruct an instance from its persisted row.
    pub fn from_row(row: &InstanceRow) -> Result<Self, ServerError> {
        let key_bytes: [u8; 32] = hex::decode(&row.merchant_priv)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                ServerError::InitializeError(format!("instance '{}' has a corrupt signing key", row.id))
            })?;
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let merchant_pub = signing_key.verifying_key();
        Ok(Self {
            id: row.id.clone(),
            name: row.name.clone(),
            signing_key: Secret::new(signing_key),
            merchant_pub,
            tip_exchange: row.tip_exchange.clone(),
            tip_reserve_priv: row.tip_reserve_priv.clone().map(Secret::new),
            wire_methods: row.accounts.iter().map(WireMethod::from_account_row).collect(),
        })
    }

    pub fn to_row(&self) -> InstanceRow {
        InstanceRow {
            id: self.id.clone(),
            name: self.name.clone(),
            merchant_priv: hex::encode(self.signing_key.reveal().to_bytes()),
            tip_exchange: self.tip_exchange.clone(),
            tip_reserve_priv: self.tip_reserve_priv.as_ref().map(|s| s.reveal().clone()),
            accounts: self.wire_methods.iter().map(WireMethod::to_account_row).collect(),
        }
    }

    pub fn merchant_pub_hex(&self) -> String {
        hex::encode(self.merchant_pub.to_bytes())
    }

    pub fn tip_reserve_priv(&self) -> Option<&Secret<String>> {
        self.tip_reserve_priv.as_ref()
    }

    pub fn active_wire_methods(&self) -> impl Iterator<Item = &WireMethod> {
        self.wire_methods.iter().filter(|m| m.active)
    }
}

/// Shared, read-mostly map of instance id to instance.
#[derive(Default)]
pub struct InstanceRegistry {
    inner: RwLock<HashMap<String, Arc<MerchantInstance>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance. Fails if the id is already taken.
    pub fn add(&self, instance: Arc<MerchantInstance>) -> Result<(), ServerError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        if map.contains_key(&instance.id) {
            return Err(ServerError::InstanceIdExists(instance.id.clone()));
        }
        debug!("🧑‍💼️ Registered instance '{}' ({})", instance.id, instance.merchant_pub_hex());
        map.insert(instance.id.clone(), instance);
        Ok(())
    }

    /// Resolve an instance by id. `None` (from a request without an `/instances/{id}` prefix) resolves to the
    /// default instance.
    pub fn lookup(&self, instance_id: Option<&str>) -> Result<Arc<MerchantInstance>, ServerError> {
        let id = instance_id.unwrap_or("default");
        let map = self.inner.read().map_err(|_| poisoned())?;
        map.get(id).cloned().ok_or_else(|| ServerError::InstanceUnknown(id.to_string()))
    }

    pub fn all(&self) -> Result<Vec<Arc<MerchantInstance>>, ServerError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut instances: Vec<_> = map.values().cloned().collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> ServerError {
    ServerError::InternalInvariant("instance registry lock poisoned".to_string())
}
