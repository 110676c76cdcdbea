//! Shared environment for the end-to-end tests: in-memory store,
//! scriptable prompts, a deterministic (optionally constant) random
//! source, and an adjustable clock.

// each test binary uses a different subset of the helpers
#![allow(dead_code)]

use fidokit_ctap::status::Result;
use fidokit_ctap::store::{CredentialEntry, CredentialStore, MemoryStore};
use fidokit_ctap::types::{RelyingParty, User};
use fidokit_ctap::{
    PlatformCallbacks, UpIntent, UpResult, UserInteractionCallbacks, UvResult,
};

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub struct TestEnv {
    pub store: MemoryStore,
    pub up_result: Mutex<UpResult>,
    pub uv_result: Mutex<UvResult>,
    up_prompts: AtomicUsize,
    pin_hash: Mutex<Option<[u8; 32]>>,
    rng_state: AtomicU64,
    fixed_random: Mutex<Option<u8>>,
    clock: AtomicU64,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            up_result: Mutex::new(UpResult::Accepted),
            uv_result: Mutex::new(UvResult::Accepted),
            up_prompts: AtomicUsize::new(0),
            pin_hash: Mutex::new(None),
            rng_state: AtomicU64::new(0x2545F4914F6CDD1D),
            fixed_random: Mutex::new(None),
            clock: AtomicU64::new(50_000),
        }
    }

    pub fn deny_up(&self) {
        *self.up_result.lock().unwrap() = UpResult::Denied;
    }

    pub fn up_prompt_count(&self) -> usize {
        self.up_prompts.load(Ordering::SeqCst)
    }

    /// Make every subsequent random byte equal `byte`; simulates an RNG
    /// that repeats itself.
    pub fn pin_randomness(&self, byte: u8) {
        *self.fixed_random.lock().unwrap() = Some(byte);
    }

    pub fn advance_clock(&self, ms: u64) {
        self.clock.fetch_add(ms, Ordering::SeqCst);
    }
}

impl UserInteractionCallbacks for TestEnv {
    fn request_up(
        &self,
        _intent: UpIntent,
        _user: Option<&User>,
        _rp: Option<&RelyingParty>,
    ) -> Result<UpResult> {
        self.up_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(*self.up_result.lock().unwrap())
    }

    fn request_uv(&self) -> Result<UvResult> {
        Ok(*self.uv_result.lock().unwrap())
    }
}

impl PlatformCallbacks for TestEnv {
    fn fill_random(&self, dest: &mut [u8]) {
        if let Some(byte) = *self.fixed_random.lock().unwrap() {
            dest.fill(byte);
            return;
        }
        for byte in dest.iter_mut() {
            let mut state = self.rng_state.fetch_add(0x9E3779B97F4A7C15, Ordering::SeqCst);
            state ^= state >> 30;
            state = state.wrapping_mul(0xBF58476D1CE4E5B9);
            *byte = (state >> 32) as u8;
        }
    }

    fn millis(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn load_pin_hash(&self) -> Result<Option<[u8; 32]>> {
        Ok(*self.pin_hash.lock().unwrap())
    }

    fn store_pin_hash(&self, hash: Option<&[u8; 32]>) -> Result<()> {
        *self.pin_hash.lock().unwrap() = hash.copied();
        Ok(())
    }
}

impl CredentialStore for TestEnv {
    fn get_entry(&self, id: &[u8]) -> Result<Option<CredentialEntry>> {
        self.store.get_entry(id)
    }

    fn list_entries(&self, rp_id: &str) -> Result<Vec<CredentialEntry>> {
        self.store.list_entries(rp_id)
    }

    fn add_entry(&self, entry: CredentialEntry) -> Result<()> {
        self.store.add_entry(entry)
    }

    fn update_entry(&self, entry: &CredentialEntry) -> Result<()> {
        self.store.update_entry(entry)
    }

    fn persist(&self) -> Result<()> {
        self.store.persist()
    }

    fn erase_all(&self) -> Result<()> {
        self.store.erase_all()
    }
}
