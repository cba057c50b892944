//! Typed operation sets, built once per stored class at startup.

use std::fmt;
use std::marker::PhantomData;

use parley_core::events::{CrudAction, Event, EventRecord, EventStatus, EventType};
use parley_core::models::User;
use parley_core::{Datetime, Envelope, Key, KeyError, KeyShape, ObjectClass, Owner, StoredObject};
use serde::Serialize;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::database::Database;
use crate::documents::{DocumentRepo, ObjectStore};
use crate::error::{Result, StoreError};
use crate::keyvalue::KvRepo;
use crate::pubsub::EventBus;
use crate::search::{ListQuery, SearchIndex};

fn require_shape(class: ObjectClass, requested: KeyShape) -> Result<()> {
    let actual = class.shape();
    if actual != requested {
        return Err(KeyError::ShapeMismatch {
            class,
            actual,
            requested,
        }
        .into());
    }
    Ok(())
}

/// Publish an `object` event for a completed mutation. Best effort.
fn notify(events: Option<&EventBus>, owner: &Owner, action: CrudAction, object: Value, clock_ms: u64) {
    let Some(bus) = events else { return };
    let record = EventRecord::new(
        owner.clone(),
        EventType::Object,
        Event::crud(action, EventStatus::Completed, object),
        Datetime::from_millis(clock_ms).datetime_iso,
    );
    if let Err(e) = bus.publish_event(&record) {
        warn!(error = %e, "failed to publish object event");
    }
}

/// Create/read/update/delete/list for one instance-shaped class.
pub struct Collection<T> {
    store: ObjectStore,
    search: SearchIndex,
    events: Option<EventBus>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            search: self.search.clone(),
            events: self.events.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: StoredObject> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection").field("class", &T::CLASS).finish()
    }
}

impl<T: StoredObject> Collection<T> {
    pub fn new(db: Database) -> Result<Self> {
        require_shape(T::CLASS, KeyShape::Instance)?;
        Ok(Self {
            store: ObjectStore::new(db.clone()),
            search: SearchIndex::new(db),
            events: None,
            _marker: PhantomData,
        })
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn class(&self) -> ObjectClass {
        T::CLASS
    }

    pub fn key(&self, owner: &Owner, id: u64) -> Result<Key> {
        Ok(Key::instance(T::CLASS, owner, id)?)
    }

    fn now_ms(&self) -> u64 {
        self.store.database().clock().now_ms()
    }

    /// Assign the next id and store the object under it, atomically.
    #[instrument(skip(self, object), fields(class = %T::CLASS, owner = %owner))]
    pub async fn create(&self, owner: &Owner, object: T) -> Result<Envelope<T>> {
        let object = serde_json::to_value(&object)?;
        let owner_c = owner.clone();
        let env = self
            .store
            .database()
            .transaction(move |conn, now| {
                let id = DocumentRepo::next_id(conn, T::CLASS)?;
                let env = Envelope::new(id, T::CLASS, owner_c, object, Datetime::from_millis(now));
                let key = env.key()?;
                if !DocumentRepo::insert_if_absent(conn, &key, &serde_json::to_string(&env)?, None, now)? {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                Ok(env)
            })
            .await?;
        notify(self.events.as_ref(), owner, CrudAction::Create, env.to_value()?, self.now_ms());
        Ok(env.into_typed()?)
    }

    #[instrument(skip(self), fields(class = %T::CLASS, owner = %owner))]
    pub async fn get(&self, owner: &Owner, id: u64) -> Result<Envelope<T>> {
        Ok(self.store.get(&self.key(owner, id)?).await?.into_typed()?)
    }

    #[instrument(skip(self, object), fields(class = %T::CLASS, owner = %owner))]
    pub async fn update(&self, owner: &Owner, id: u64, object: T) -> Result<Envelope<T>> {
        let env = self
            .store
            .replace_payload(&self.key(owner, id)?, serde_json::to_value(&object)?)
            .await?;
        notify(self.events.as_ref(), owner, CrudAction::Update, env.to_value()?, self.now_ms());
        Ok(env.into_typed()?)
    }

    #[instrument(skip(self), fields(class = %T::CLASS, owner = %owner))]
    pub async fn delete(&self, owner: &Owner, id: u64) -> Result<bool> {
        let deleted = self.store.delete(&self.key(owner, id)?).await?;
        if deleted {
            let object = serde_json::json!({"id": id, "class_name": T::CLASS});
            notify(self.events.as_ref(), owner, CrudAction::Delete, object, self.now_ms());
        }
        Ok(deleted)
    }

    pub async fn list(&self, owner: &Owner, query: ListQuery) -> Result<Vec<Envelope<T>>> {
        self.search
            .list(T::CLASS, owner, query)
            .await?
            .into_iter()
            .map(|env| env.into_typed().map_err(StoreError::from))
            .collect()
    }

    /// Append one element to an array field of the payload.
    pub async fn append<I: Serialize>(
        &self,
        owner: &Owner,
        id: u64,
        field: &str,
        item: &I,
    ) -> Result<Envelope<T>> {
        let env = self
            .store
            .append_to_array_field(&self.key(owner, id)?, field, serde_json::to_value(item)?)
            .await?;
        notify(self.events.as_ref(), owner, CrudAction::Update, env.to_value()?, self.now_ms());
        Ok(env.into_typed()?)
    }

    pub async fn replace_element<I: Serialize>(
        &self,
        owner: &Owner,
        id: u64,
        field: &str,
        index: usize,
        item: &I,
    ) -> Result<Envelope<T>> {
        let env = self
            .store
            .replace_array_element(&self.key(owner, id)?, field, index, serde_json::to_value(item)?)
            .await?;
        notify(self.events.as_ref(), owner, CrudAction::Update, env.to_value()?, self.now_ms());
        Ok(env.into_typed()?)
    }
}

/// Operations for a class with at most one document per owner.
pub struct Singleton<T> {
    store: ObjectStore,
    events: Option<EventBus>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Singleton<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            events: self.events.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: StoredObject> fmt::Debug for Singleton<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Singleton").field("class", &T::CLASS).finish()
    }
}

impl<T: StoredObject> Singleton<T> {
    pub fn new(db: Database) -> Result<Self> {
        require_shape(T::CLASS, KeyShape::Singleton)?;
        Ok(Self {
            store: ObjectStore::new(db),
            events: None,
            _marker: PhantomData,
        })
    }

    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    fn key(&self, owner: &Owner) -> Result<Key> {
        Ok(Key::singleton(T::CLASS, owner)?)
    }

    fn now_ms(&self) -> u64 {
        self.store.database().clock().now_ms()
    }

    /// Fails with `AlreadyExists` when the owner already has one.
    #[instrument(skip(self, object), fields(class = %T::CLASS, owner = %owner))]
    pub async fn create(&self, owner: &Owner, object: T) -> Result<Envelope<T>> {
        let object = serde_json::to_value(&object)?;
        let owner_c = owner.clone();
        let env = self
            .store
            .database()
            .transaction(move |conn, now| {
                let key = Key::singleton(T::CLASS, &owner_c)?;
                if DocumentRepo::get(conn, &key.to_string(), now)?.is_some() {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                let id = DocumentRepo::next_id(conn, T::CLASS)?;
                let env = Envelope::new(id, T::CLASS, owner_c, object, Datetime::from_millis(now));
                if !DocumentRepo::insert_if_absent(conn, &key, &serde_json::to_string(&env)?, None, now)? {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                Ok(env)
            })
            .await?;
        notify(self.events.as_ref(), owner, CrudAction::Create, env.to_value()?, self.now_ms());
        Ok(env.into_typed()?)
    }

    pub async fn get(&self, owner: &Owner) -> Result<Envelope<T>> {
        Ok(self.store.get(&self.key(owner)?).await?.into_typed()?)
    }

    #[instrument(skip(self, object), fields(class = %T::CLASS, owner = %owner))]
    pub async fn update(&self, owner: &Owner, object: T) -> Result<Envelope<T>> {
        let env = self
            .store
            .replace_payload(&self.key(owner)?, serde_json::to_value(&object)?)
            .await?;
        notify(self.events.as_ref(), owner, CrudAction::Update, env.to_value()?, self.now_ms());
        Ok(env.into_typed()?)
    }

    pub async fn delete(&self, owner: &Owner) -> Result<bool> {
        let deleted = self.store.delete(&self.key(owner)?).await?;
        if deleted {
            let object = serde_json::json!({"class_name": T::CLASS});
            notify(self.events.as_ref(), owner, CrudAction::Delete, object, self.now_ms());
        }
        Ok(deleted)
    }
}

/// Fields supplied at signup.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Global `User:{id}` records plus their unique email lookup.
#[derive(Clone, Debug)]
pub struct UserAccounts {
    store: ObjectStore,
}

impl UserAccounts {
    pub fn new(db: Database) -> Self {
        Self {
            store: ObjectStore::new(db),
        }
    }

    fn email_key(email: &str) -> String {
        format!("UserEmail:{}", email.trim().to_lowercase())
    }

    /// Create the account and claim its email in one transaction.
    #[instrument(skip(self, new_user))]
    pub async fn create(&self, new_user: NewUser) -> Result<Envelope<User>> {
        let email = new_user.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') || email.chars().any(char::is_whitespace) {
            return Err(StoreError::InvalidRequest("invalid email address".into()));
        }
        let env = self
            .store
            .database()
            .transaction(move |conn, now| {
                let email_key = Self::email_key(&email);
                let id = DocumentRepo::next_id(conn, ObjectClass::User)?;
                if !KvRepo::set_if_absent(conn, &email_key, &id.to_string(), None, now)? {
                    return Err(StoreError::AlreadyExists(email_key));
                }
                let user = User {
                    id,
                    first_name: new_user.first_name,
                    last_name: new_user.last_name,
                    email,
                    email_verified: false,
                };
                let owner = Owner::new(id.to_string())?;
                let env = Envelope::new(
                    id,
                    ObjectClass::User,
                    owner,
                    serde_json::to_value(&user)?,
                    Datetime::from_millis(now),
                );
                let key = env.key()?;
                if !DocumentRepo::insert_if_absent(conn, &key, &serde_json::to_string(&env)?, None, now)? {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                Ok(env)
            })
            .await?;
        Ok(env.into_typed()?)
    }

    pub async fn get(&self, id: u64) -> Result<Envelope<User>> {
        let key = Key::global(ObjectClass::User, id)?;
        Ok(self.store.get(&key).await?.into_typed()?)
    }

    #[instrument(skip(self))]
    pub async fn find_by_email(&self, email: &str) -> Result<Envelope<User>> {
        let email_key = Self::email_key(email);
        let env = self
            .store
            .database()
            .call(move |conn, now| {
                let id = KvRepo::get(conn, &email_key, now)?
                    .ok_or_else(|| StoreError::NotFound(email_key.clone()))?;
                let id: u64 = id.parse().map_err(|_| StoreError::CorruptRow {
                    table: "kv",
                    column: "value",
                    detail: format!("user id {id:?} for {email_key}"),
                })?;
                let key = Key::global(ObjectClass::User, id)?.to_string();
                DocumentRepo::get(conn, &key, now)?.ok_or(StoreError::NotFound(key))
            })
            .await?;
        Ok(env.into_typed()?)
    }

    #[instrument(skip(self))]
    pub async fn mark_email_verified(&self, id: u64) -> Result<Envelope<User>> {
        let key = Key::global(ObjectClass::User, id)?;
        let env = self
            .store
            .database()
            .transaction(move |conn, now| {
                let key = key.to_string();
                let env = DocumentRepo::get(conn, &key, now)?
                    .ok_or_else(|| StoreError::NotFound(key.clone()))?;
                let mut payload = env.object;
                let Some(fields) = payload.as_object_mut() else {
                    return Err(StoreError::CorruptRow {
                        table: "documents",
                        column: "doc",
                        detail: format!("{key} payload is not an object"),
                    });
                };
                fields.insert("email_verified".into(), Value::Bool(true));
                DocumentRepo::replace_payload(conn, &key, &payload, now)?;
                DocumentRepo::get(conn, &key, now)?.ok_or(StoreError::NotFound(key))
            })
            .await?;
        Ok(env.into_typed()?)
    }
}
