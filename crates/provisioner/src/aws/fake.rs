//! In-memory [`KmsApi`] used by reconciliation tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use common::resources::{KEY_SPEC, KEY_USAGE};
use common::{AliasRecord, KeyRecord, KeyState};

use super::kms::{KmsApi, KmsError};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct FakeKey {
    pub record: KeyRecord,
    pub policy: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    keys: HashMap<String, FakeKey>,
    aliases: BTreeMap<String, String>,
    mutations: usize,
    alias_failures: usize,
}

/// A single-account, single-region KMS.
#[derive(Debug, Default)]
pub struct FakeKms {
    state: Mutex<State>,
}

impl FakeKms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls served so far.
    pub fn mutations(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub fn key(&self, key_id: &str) -> FakeKey {
        self.state.lock().unwrap().keys[key_id].clone()
    }

    pub fn key_count(&self) -> usize {
        self.state.lock().unwrap().keys.len()
    }

    /// Keys not pending deletion.
    pub fn live_key_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .keys
            .values()
            .filter(|k| k.record.state != KeyState::PendingDeletion)
            .count()
    }

    /// Make the next `n` `CreateAlias`/`UpdateAlias` calls fail as throttled.
    pub fn fail_next_alias_calls(&self, n: usize) {
        self.state.lock().unwrap().alias_failures = n;
    }

    pub fn alias_target(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().aliases.get(name).cloned()
    }

    /// Insert a key directly, bypassing the mutation counter.
    pub fn seed_key(&self, key: FakeKey) {
        self.state
            .lock()
            .unwrap()
            .keys
            .insert(key.record.key_id.clone(), key);
    }

    pub fn seed_alias(&self, name: &str, key_id: &str) {
        self.state
            .lock()
            .unwrap()
            .aliases
            .insert(name.to_owned(), key_id.to_owned());
    }

    /// Change a key behind the reconciler's back.
    pub fn edit_key(&self, key_id: &str, f: impl FnOnce(&mut FakeKey)) {
        let mut st = self.state.lock().unwrap();
        f(st.keys.get_mut(key_id).unwrap());
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut State) -> Result<T, KmsError>,
    ) -> Result<T, KmsError> {
        let mut st = self.state.lock().unwrap();
        st.mutations += 1;
        f(&mut st)
    }

    fn throttle_alias(&self) -> Result<(), KmsError> {
        let mut st = self.state.lock().unwrap();
        if st.alias_failures == 0 {
            return Ok(());
        }
        st.alias_failures -= 1;
        Err(KmsError::Other("ThrottlingException: rate exceeded".into()))
    }
}

pub fn key_arn(key_id: &str) -> String {
    format!("arn:aws:kms:{REGION}:{ACCOUNT}:key/{key_id}")
}

fn missing(id: &str) -> KmsError {
    KmsError::NotFound(format!("{id} does not exist"))
}

fn live_key<'a>(st: &'a mut State, key_id: &str) -> Result<&'a mut FakeKey, KmsError> {
    match st.keys.get_mut(key_id) {
        Some(k) if k.record.state == KeyState::PendingDeletion => Err(KmsError::Other(format!(
            "KMSInvalidStateException: {key_id} is pending deletion"
        ))),
        Some(k) => Ok(k),
        None => Err(missing(key_id)),
    }
}

#[async_trait]
impl KmsApi for FakeKms {
    async fn describe_alias(&self, name: &str) -> Result<Option<AliasRecord>, KmsError> {
        let st = self.state.lock().unwrap();
        Ok(st.aliases.get(name).map(|target| AliasRecord {
            name: name.to_owned(),
            arn: format!("arn:aws:kms:{REGION}:{ACCOUNT}:{name}"),
            target_key_id: target.clone(),
        }))
    }

    async fn describe_key(&self, key_id: &str) -> Result<KeyRecord, KmsError> {
        let st = self.state.lock().unwrap();
        let id = st.aliases.get(key_id).map(String::as_str).unwrap_or(key_id);
        st.keys
            .get(id)
            .map(|k| k.record.clone())
            .ok_or_else(|| missing(key_id))
    }

    async fn create_key(
        &self,
        description: &str,
        policy: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<KeyRecord, KmsError> {
        self.mutate(|st| {
            let key_id = uuid::Uuid::new_v4().to_string();
            let record = KeyRecord {
                key_id: key_id.clone(),
                arn: key_arn(&key_id),
                description: description.to_owned(),
                key_spec: KEY_SPEC.into(),
                key_usage: KEY_USAGE.into(),
                key_manager: "CUSTOMER".into(),
                state: KeyState::Enabled,
            };
            st.keys.insert(
                key_id,
                FakeKey {
                    record: record.clone(),
                    policy: policy.to_owned(),
                    tags: tags.clone(),
                },
            );
            Ok(record)
        })
    }

    async fn get_key_policy(&self, key_id: &str) -> Result<String, KmsError> {
        let mut st = self.state.lock().unwrap();
        live_key(&mut st, key_id).map(|k| k.policy.clone())
    }

    async fn put_key_policy(&self, key_id: &str, policy: &str) -> Result<(), KmsError> {
        self.mutate(|st| {
            live_key(st, key_id)?.policy = policy.to_owned();
            Ok(())
        })
    }

    async fn update_key_description(
        &self,
        key_id: &str,
        description: &str,
    ) -> Result<(), KmsError> {
        self.mutate(|st| {
            live_key(st, key_id)?.record.description = description.to_owned();
            Ok(())
        })
    }

    async fn enable_key(&self, key_id: &str) -> Result<(), KmsError> {
        self.mutate(|st| {
            live_key(st, key_id)?.record.state = KeyState::Enabled;
            Ok(())
        })
    }

    async fn list_tags(&self, key_id: &str) -> Result<BTreeMap<String, String>, KmsError> {
        let mut st = self.state.lock().unwrap();
        live_key(&mut st, key_id).map(|k| k.tags.clone())
    }

    async fn tag_resource(
        &self,
        key_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), KmsError> {
        self.mutate(|st| {
            live_key(st, key_id)?.tags.extend(tags.clone());
            Ok(())
        })
    }

    async fn untag_resource(&self, key_id: &str, keys: &[String]) -> Result<(), KmsError> {
        self.mutate(|st| {
            let key = live_key(st, key_id)?;
            for k in keys {
                key.tags.remove(k);
            }
            Ok(())
        })
    }

    async fn create_alias(&self, name: &str, key_id: &str) -> Result<(), KmsError> {
        self.throttle_alias()?;
        self.mutate(|st| {
            if st.aliases.contains_key(name) {
                return Err(KmsError::AlreadyExists(format!("{name} already exists")));
            }
            live_key(st, key_id)?;
            st.aliases.insert(name.to_owned(), key_id.to_owned());
            Ok(())
        })
    }

    async fn update_alias(&self, name: &str, key_id: &str) -> Result<(), KmsError> {
        self.throttle_alias()?;
        self.mutate(|st| {
            live_key(st, key_id)?;
            match st.aliases.get_mut(name) {
                Some(target) => {
                    *target = key_id.to_owned();
                    Ok(())
                }
                None => Err(missing(name)),
            }
        })
    }

    async fn delete_alias(&self, name: &str) -> Result<(), KmsError> {
        self.mutate(|st| st.aliases.remove(name).map(|_| ()).ok_or_else(|| missing(name)))
    }

    async fn schedule_key_deletion(
        &self,
        key_id: &str,
        _window_days: i32,
    ) -> Result<(), KmsError> {
        self.mutate(|st| {
            live_key(st, key_id)?.record.state = KeyState::PendingDeletion;
            Ok(())
        })
    }
}
