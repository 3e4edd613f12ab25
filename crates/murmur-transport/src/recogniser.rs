//! Tag recognition: "given a tag, which contact sent it, and on which stream?"
//!
//! Tags carry no plaintext identifier, so the receiver trial-decrypts each one
//! under the tag key of every contact it expects to hear from. Each contact
//! has a sliding window of expected stream numbers; a stream number is
//! accepted once, which also makes replayed connections unrecognisable.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Mutex,
};

use murmur_crypto::{Role, SecretKey, TAG_LENGTH, decode_tag, derive_tag_key};
use tracing::debug;

use crate::{
    context::{ConnectionContext, ContactId, TransportIndex},
    error::TransportError,
};

/// Default number of stream numbers accepted ahead of the lowest unseen one
pub const DEFAULT_WINDOW_SIZE: usize = 32;

/// Maps an incoming tag to the context that keys its connection.
pub trait TagRecogniser: Send + Sync {
    /// Returns the matching context, or `None` if no contact sent this tag.
    ///
    /// A recognised stream number is consumed: the same tag will not be
    /// recognised again.
    fn recognise(&self, tag: &[u8; TAG_LENGTH]) -> Result<Option<ConnectionContext>, TransportError>;
}

struct Candidate {
    secret: SecretKey,
    peer_tag_key: SecretKey,
    role: Role,
    window_base: u64,
    seen: VecDeque<bool>,
}

impl Candidate {
    /// Mark `stream` seen and slide the window past any seen prefix.
    fn accept(&mut self, stream: u64) -> bool {
        let Some(offset) = stream.checked_sub(self.window_base) else {
            return false;
        };
        let Some(slot) = self.seen.get_mut(offset as usize) else {
            return false;
        };
        if *slot {
            return false;
        }
        *slot = true;

        while self.seen.front() == Some(&true) {
            self.seen.pop_front();
            self.seen.push_back(false);
            self.window_base += 1;
        }
        true
    }
}

/// In-memory recogniser over the current period secrets of known contacts.
pub struct MemoryTagRecogniser {
    window_size: usize,
    candidates: Mutex<BTreeMap<(ContactId, TransportIndex), Candidate>>,
}

impl Default for MemoryTagRecogniser {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTagRecogniser {
    /// Recogniser with the default window size.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW_SIZE)
    }

    /// Recogniser accepting `window_size` stream numbers ahead.
    pub fn with_window(window_size: usize) -> Self {
        Self { window_size: window_size.max(1), candidates: Mutex::new(BTreeMap::new()) }
    }

    /// Expect connections from `contact` over `transport`, keyed by `secret`.
    ///
    /// `role` is the local role; tags are checked against the peer's tag key.
    /// Replaces any previous entry for the pair, resetting its window to
    /// start at `first_stream`.
    #[allow(clippy::expect_used)]
    pub fn add_contact(
        &self,
        contact: ContactId,
        transport: TransportIndex,
        secret: SecretKey,
        role: Role,
        first_stream: u64,
    ) -> Result<(), TransportError> {
        let peer_tag_key = derive_tag_key(&secret, role.peer())?;
        let candidate = Candidate {
            secret,
            peer_tag_key,
            role,
            window_base: first_stream,
            seen: std::iter::repeat_n(false, self.window_size).collect(),
        };
        self.candidates.lock().expect("Mutex poisoned").insert((contact, transport), candidate);
        Ok(())
    }

    /// Stop expecting connections from `contact` over `transport`.
    #[allow(clippy::expect_used)]
    pub fn remove_contact(&self, contact: ContactId, transport: TransportIndex) {
        self.candidates.lock().expect("Mutex poisoned").remove(&(contact, transport));
    }

    /// Lowest stream number still expected from a contact.
    #[allow(clippy::expect_used)]
    pub fn window_base(&self, contact: ContactId, transport: TransportIndex) -> Option<u64> {
        self.candidates
            .lock()
            .expect("Mutex poisoned")
            .get(&(contact, transport))
            .map(|c| c.window_base)
    }
}

impl TagRecogniser for MemoryTagRecogniser {
    #[allow(clippy::expect_used)]
    fn recognise(&self, tag: &[u8; TAG_LENGTH]) -> Result<Option<ConnectionContext>, TransportError> {
        let mut candidates = self.candidates.lock().expect("Mutex poisoned");

        for (&(contact_id, transport_index), candidate) in candidates.iter_mut() {
            let Some(stream_number) = decode_tag(tag, &candidate.peer_tag_key) else {
                continue;
            };
            if !candidate.accept(stream_number) {
                debug!(%contact_id, stream_number, "tag outside window or replayed");
                continue;
            }

            debug!(%contact_id, stream_number, "tag recognised");
            return Ok(Some(ConnectionContext {
                contact_id,
                transport_index,
                secret: candidate.secret.clone(),
                stream_number,
                role: candidate.role,
            }));
        }
        Ok(None)
    }
}
