//! Text surface seam.
//!
//! The editing widget itself lives in the host. The session only enables or
//! disables it and hands it a [`TextBinding`] to the shared text of the
//! replicated document.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use yrs::types::text::TextEvent;
use yrs::{Doc, GetString, Observable, Text, TextRef, Transact};

use crate::subscription::Subscription;

/// Name of the shared text inside the replicated document.
pub const TEXT_NAME: &str = "quill";

/// Live link between a surface and the shared text of one session.
///
/// Clones share the same link. Once the session destroys it every clone
/// turns inert: edits are dropped and the content reads empty.
#[derive(Clone)]
pub struct TextBinding {
    doc: Doc,
    text: TextRef,
    live: Arc<AtomicBool>,
}

impl TextBinding {
    pub(crate) fn new(doc: &Doc) -> Self {
        Self {
            doc: doc.clone(),
            text: doc.get_or_insert_text(TEXT_NAME),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Insert `chunk` at character offset `index`, clamped to the end.
    pub fn insert(&self, index: u32, chunk: &str) {
        if !self.is_live() {
            return;
        }
        let mut txn = self.doc.transact_mut();
        let index = index.min(self.text.len(&txn));
        self.text.insert(&mut txn, index, chunk);
    }

    /// Append `chunk` at the end of the text.
    pub fn push(&self, chunk: &str) {
        if !self.is_live() {
            return;
        }
        let mut txn = self.doc.transact_mut();
        let end = self.text.len(&txn);
        self.text.insert(&mut txn, end, chunk);
    }

    /// Remove up to `len` characters starting at `index`.
    pub fn remove(&self, index: u32, len: u32) {
        if !self.is_live() {
            return;
        }
        let mut txn = self.doc.transact_mut();
        let total = self.text.len(&txn);
        if index >= total {
            return;
        }
        self.text.remove_range(&mut txn, index, len.min(total - index));
    }

    pub fn content(&self) -> String {
        if !self.is_live() {
            return String::new();
        }
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    /// Call `callback` with the full text after every change, local or remote.
    pub fn observe(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
        let live = self.live.clone();
        let subscription = self.text.observe(move |txn, event: &TextEvent| {
            if live.load(Ordering::Acquire) {
                callback(&event.target().get_string(txn));
            }
        });
        Subscription::from_yrs(subscription)
    }

    pub(crate) fn destroy(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for TextBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextBinding")
            .field("live", &self.is_live())
            .finish()
    }
}

/// The host's editing widget, as seen by the session.
pub trait TextSurface: Send + Sync {
    /// Allow or forbid local edits.
    fn set_enabled(&self, enabled: bool);

    /// Bind the widget to the shared text.
    fn attach(&self, binding: TextBinding);

    /// Unbind. The binding handed to `attach` is dead afterwards.
    fn detach(&self);
}

/// A surface without a widget: tracks the gate and the binding and lets the
/// host type through it.
#[derive(Default)]
pub struct HeadlessSurface {
    enabled: AtomicBool,
    binding: Mutex<Option<TextBinding>>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Append `text` through the binding. Returns `false` when the surface
    /// is disabled or unbound, in which case nothing is written.
    pub fn type_text(&self, text: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.lock().as_ref() {
            Some(binding) if binding.is_live() => {
                binding.push(text);
                true
            }
            _ => false,
        }
    }

    /// Current content of the bound text; empty when unbound.
    pub fn content(&self) -> String {
        self.lock()
            .as_ref()
            .map(TextBinding::content)
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TextBinding>> {
        self.binding.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TextSurface for HeadlessSurface {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn attach(&self, binding: TextBinding) {
        *self.lock() = Some(binding);
    }

    fn detach(&self) {
        self.lock().take();
    }
}
