// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory store for accounts, weddings, RSVPs and analytics counters.
//!
//! Held behind a `tokio::sync::RwLock` in [`AppState`](crate::state::AppState).
//! Nothing here survives a restart.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::Role;
use crate::error::{ApiError, ErrorCode};
use crate::models::{
    AnalyticsEvent, CreateRsvpRequest, CreateWeddingRequest, Rsvp, UpdateWeddingRequest, User,
    UserStatus, Wedding,
};
use crate::security::brute_force::normalize_email;

/// Lifetime of a password reset id.
pub const RESET_TTL: ChronoDuration = ChronoDuration::hours(1);

/// 24 lowercase hex characters.
pub fn new_object_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(24);
    id
}

fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone)]
struct ResetEntry {
    user_id: String,
    expires_at: DateTime<Utc>,
}

/// Record counts for the admin overview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub users: usize,
    pub weddings: usize,
    pub rsvps: usize,
    pub analytics_events: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: HashMap<String, User>,
    /// normalized email -> user id
    emails: HashMap<String, String>,
    weddings: HashMap<String, Wedding>,
    /// slug -> wedding id
    slugs: HashMap<String, String>,
    rsvps: HashMap<String, Vec<Rsvp>>,
    /// sha256(reset id) -> entry
    resets: HashMap<String, ResetEntry>,
    events: HashMap<(String, AnalyticsEvent), u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    pub fn create_user(
        &mut self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password_hash: String,
        role: Role,
    ) -> Result<User, ApiError> {
        let email = normalize_email(email);
        if self.emails.contains_key(&email) {
            return Err(ApiError::new(
                ErrorCode::EmailAlreadyExists,
                "An account with this email already exists",
            ));
        }
        let user = User {
            id: new_object_id(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            email: email.clone(),
            password_hash,
            role,
            status: UserStatus::Unverified,
            created_at: Utc::now(),
        };
        self.emails.insert(email, user.id.clone());
        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.emails
            .get(&normalize_email(email))
            .and_then(|id| self.users.get(id))
    }

    pub fn set_status(&mut self, id: &str, status: UserStatus) -> Result<User, ApiError> {
        let user = self
            .users
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        user.status = status;
        Ok(user.clone())
    }

    pub fn set_password_hash(&mut self, id: &str, password_hash: String) -> Result<(), ApiError> {
        let user = self
            .users
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        user.password_hash = password_hash;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Password reset ids
    // -------------------------------------------------------------------------

    /// Mint a single-use reset id for `user_id`. Only its digest is kept.
    pub fn issue_reset(&mut self, user_id: &str, now: DateTime<Utc>) -> String {
        let token = hex::encode(rand::random::<[u8; 32]>());
        self.resets.insert(
            digest(&token),
            ResetEntry {
                user_id: user_id.to_string(),
                expires_at: now + RESET_TTL,
            },
        );
        token
    }

    /// Consume a reset id and return its user. Unknown, used and expired ids
    /// are indistinguishable to the caller.
    pub fn consume_reset(&mut self, token: &str, now: DateTime<Utc>) -> Result<String, ApiError> {
        let entry = self.resets.remove(&digest(token));
        match entry {
            Some(entry) if now < entry.expires_at => Ok(entry.user_id),
            _ => Err(ApiError::new(
                ErrorCode::InvalidToken,
                "Reset token is invalid or has expired",
            )),
        }
    }

    // -------------------------------------------------------------------------
    // Weddings
    // -------------------------------------------------------------------------

    pub fn create_wedding(
        &mut self,
        owner_id: &str,
        request: CreateWeddingRequest,
    ) -> Result<Wedding, ApiError> {
        if self.slugs.contains_key(&request.slug) {
            return Err(ApiError::conflict("A wedding with this slug already exists"));
        }
        let now = Utc::now();
        let wedding = Wedding {
            id: new_object_id(),
            owner_id: owner_id.to_string(),
            slug: request.slug,
            title: request.title,
            partner_one: request.partner_one,
            partner_two: request.partner_two,
            website_url: request.website_url,
            description: request.description,
            theme: request.theme,
            published: request.published,
            created_at: now,
            updated_at: now,
        };
        self.slugs.insert(wedding.slug.clone(), wedding.id.clone());
        self.weddings.insert(wedding.id.clone(), wedding.clone());
        Ok(wedding)
    }

    pub fn wedding(&self, id: &str) -> Option<&Wedding> {
        self.weddings.get(id)
    }

    /// Weddings owned by `owner_id`, oldest first.
    pub fn weddings_for(&self, owner_id: &str) -> Vec<Wedding> {
        let mut weddings: Vec<Wedding> = self
            .weddings
            .values()
            .filter(|w| w.owner_id == owner_id)
            .cloned()
            .collect();
        weddings.sort_by_key(|w| w.created_at);
        weddings
    }

    pub fn update_wedding(
        &mut self,
        id: &str,
        request: UpdateWeddingRequest,
    ) -> Result<Wedding, ApiError> {
        let current_slug = self
            .weddings
            .get(id)
            .map(|w| w.slug.clone())
            .ok_or_else(|| ApiError::not_found("Wedding not found"))?;

        if let Some(slug) = request.slug.as_ref().filter(|s| **s != current_slug) {
            if self.slugs.contains_key(slug) {
                return Err(ApiError::conflict("A wedding with this slug already exists"));
            }
            self.slugs.remove(&current_slug);
            self.slugs.insert(slug.clone(), id.to_string());
        }

        let wedding = self
            .weddings
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found("Wedding not found"))?;
        if let Some(slug) = request.slug {
            wedding.slug = slug;
        }
        if let Some(title) = request.title {
            wedding.title = title;
        }
        if let Some(name) = request.partner_one {
            wedding.partner_one = name;
        }
        if let Some(name) = request.partner_two {
            wedding.partner_two = name;
        }
        if request.website_url.is_some() {
            wedding.website_url = request.website_url;
        }
        if request.description.is_some() {
            wedding.description = request.description;
        }
        if let Some(theme) = request.theme {
            wedding.theme = theme;
        }
        if let Some(published) = request.published {
            wedding.published = published;
        }
        wedding.updated_at = Utc::now();
        Ok(wedding.clone())
    }

    /// Published wedding by slug. Drafts look like missing pages.
    pub fn published_by_slug(&self, slug: &str) -> Option<&Wedding> {
        self.slugs
            .get(slug)
            .and_then(|id| self.weddings.get(id))
            .filter(|w| w.published)
    }

    /// Unpublished wedding by slug, only for its owner.
    pub fn draft_by_slug(&self, slug: &str, owner_id: &str) -> Option<&Wedding> {
        self.slugs
            .get(slug)
            .and_then(|id| self.weddings.get(id))
            .filter(|w| !w.published && w.owner_id == owner_id)
    }

    // -------------------------------------------------------------------------
    // RSVPs
    // -------------------------------------------------------------------------

    pub fn add_rsvp(&mut self, wedding_id: &str, request: CreateRsvpRequest) -> Rsvp {
        let rsvp = Rsvp {
            id: new_object_id(),
            wedding_id: wedding_id.to_string(),
            name: request.name.trim().to_string(),
            email: normalize_email(&request.email),
            phone: request.phone,
            attending: request.attending,
            guests: if request.attending { request.guests } else { 0 },
            message: request.message,
            created_at: Utc::now(),
        };
        self.rsvps
            .entry(wedding_id.to_string())
            .or_default()
            .push(rsvp.clone());
        rsvp
    }

    pub fn rsvps_for(&self, wedding_id: &str) -> Vec<Rsvp> {
        self.rsvps.get(wedding_id).cloned().unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Analytics
    // -------------------------------------------------------------------------

    pub fn record_event(&mut self, wedding_id: &str, event: AnalyticsEvent) {
        *self
            .events
            .entry((wedding_id.to_string(), event))
            .or_default() += 1;
    }

    pub fn event_count(&self, wedding_id: &str, event: AnalyticsEvent) -> u64 {
        self.events
            .get(&(wedding_id.to_string(), event))
            .copied()
            .unwrap_or(0)
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            users: self.users.len(),
            weddings: self.weddings.len(),
            rsvps: self.rsvps.values().map(Vec::len).sum(),
            analytics_events: self.events.values().sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Theme;

    fn wedding_request(slug: &str) -> CreateWeddingRequest {
        CreateWeddingRequest {
            slug: slug.to_string(),
            title: "Ana & Ben".to_string(),
            partner_one: "Ana".to_string(),
            partner_two: "Ben".to_string(),
            website_url: None,
            description: None,
            theme: Theme::Garden,
            published: true,
        }
    }

    #[test]
    fn object_ids_are_24_hex() {
        let id = new_object_id();
        assert!(crate::validation::rules::is_valid_object_id(&id));
        assert_ne!(id, new_object_id());
    }

    #[test]
    fn duplicate_email_is_rejected_after_normalization() {
        let mut store = InMemoryStore::new();
        store
            .create_user("Ana", "Silva", "Ana@Example.com", "h".into(), Role::User)
            .unwrap();
        let err = store
            .create_user("Ana", "Silva", " ana@example.COM ", "h".into(), Role::User)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::EmailAlreadyExists);
        assert!(store.user_by_email("ANA@example.com").is_some());
    }

    #[test]
    fn new_users_start_unverified() {
        let mut store = InMemoryStore::new();
        let user = store
            .create_user("Ana", "Silva", "a@b.co", "h".into(), Role::User)
            .unwrap();
        assert_eq!(user.status, UserStatus::Unverified);
        let user = store.set_status(&user.id, UserStatus::Active).unwrap();
        assert_eq!(user.status, UserStatus::Active);
    }

    #[test]
    fn reset_ids_are_single_use_and_expire() {
        let mut store = InMemoryStore::new();
        let now = Utc::now();
        let token = store.issue_reset("user-1", now);
        assert!(!store.resets.contains_key(&token));
        assert_eq!(store.consume_reset(&token, now).unwrap(), "user-1");
        assert_eq!(
            store.consume_reset(&token, now).unwrap_err().code,
            ErrorCode::InvalidToken
        );

        let token = store.issue_reset("user-1", now);
        let err = store.consume_reset(&token, now + RESET_TTL).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidToken);
    }

    #[test]
    fn slugs_are_unique_across_create_and_update() {
        let mut store = InMemoryStore::new();
        let first = store.create_wedding("owner", wedding_request("ana-ben")).unwrap();
        store.create_wedding("owner", wedding_request("cara-dan")).unwrap();
        let err = store
            .create_wedding("other", wedding_request("ana-ben"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);

        let err = store
            .update_wedding(
                &first.id,
                UpdateWeddingRequest {
                    slug: Some("cara-dan".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);

        let updated = store
            .update_wedding(
                &first.id,
                UpdateWeddingRequest {
                    slug: Some("ana-and-ben".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.slug, "ana-and-ben");
        assert!(store.published_by_slug("ana-ben").is_none());
        assert!(store.published_by_slug("ana-and-ben").is_some());
    }

    #[test]
    fn drafts_are_not_public() {
        let mut store = InMemoryStore::new();
        let mut request = wedding_request("draft-page");
        request.published = false;
        store.create_wedding("owner", request).unwrap();
        assert!(store.published_by_slug("draft-page").is_none());
        assert!(store.draft_by_slug("draft-page", "owner").is_some());
        assert!(store.draft_by_slug("draft-page", "someone-else").is_none());
    }

    #[test]
    fn declined_rsvps_carry_no_guests() {
        let mut store = InMemoryStore::new();
        let rsvp = store.add_rsvp(
            "w1",
            CreateRsvpRequest {
                name: "Guest".into(),
                email: "Guest@Example.com".into(),
                phone: None,
                attending: false,
                guests: 3,
                message: None,
            },
        );
        assert_eq!(rsvp.guests, 0);
        assert_eq!(rsvp.email, "guest@example.com");
        assert_eq!(store.counts().rsvps, 1);
    }

    #[test]
    fn events_are_counted_per_wedding() {
        let mut store = InMemoryStore::new();
        store.record_event("w1", AnalyticsEvent::PageView);
        store.record_event("w1", AnalyticsEvent::PageView);
        store.record_event("w2", AnalyticsEvent::Share);
        assert_eq!(store.event_count("w1", AnalyticsEvent::PageView), 2);
        assert_eq!(store.event_count("w2", AnalyticsEvent::PageView), 0);
        assert_eq!(store.counts().analytics_events, 3);
    }
}
