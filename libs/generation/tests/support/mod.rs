//! In-memory implementations of the pipeline seams for tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{
    error::{StorageError, StorageResult},
    id::new_id,
    storage::{ObjectStore, StoredObject},
};
use generation::{
    GenerationError, GenerationResult, GenerationService, GenerationSettings, GenerationWorker,
    image_edit::{EditedImage, ImageEditClient},
    models::{
        CreditUsage, DEBIT_REASON, FileRecord, GeneratedPhoto, GenerationStatus, GenerationTask,
        NewFile, OriginalPhoto, REFUND_REASON, TaskStatus, Theme, User,
    },
    queue::TaskQueue,
    repository::GenerationRepository,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Step of `start_generation` at which a simulated failure is raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    InsertGenerated,
    Debit,
    InsertUsage,
}

#[derive(Default, Clone)]
struct State {
    users: HashMap<String, User>,
    originals: HashMap<String, OriginalPhoto>,
    themes: HashMap<String, Theme>,
    /// (album id, user id) pairs with access to the album
    members: HashSet<(String, String)>,
    files: HashMap<String, FileRecord>,
    generated: HashMap<String, GeneratedPhoto>,
    usages: Vec<CreditUsage>,
    /// (generated id, from, to) for every status write
    transitions: Vec<(String, GenerationStatus, GenerationStatus)>,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
    fail_start_at: Mutex<Option<StartStep>>,
}

fn injected(step: StartStep) -> GenerationError {
    GenerationError::from(sqlx::Error::Protocol(format!("injected failure at {:?}", step)))
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: &str, credits: i32) {
        let now = Utc::now();
        self.state.lock().unwrap().users.insert(
            id.to_string(),
            User {
                id: id.to_string(),
                email: format!("{}@example.com", id),
                credits,
                plan: "free".to_string(),
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Add an original photo, with a file stored under `storage_key` when given
    pub fn add_original(&self, id: &str, storage_key: Option<&str>) {
        let file = storage_key.map(|key| FileRecord {
            id: format!("file_{}", id),
            storage_key: key.to_string(),
            content_type: Some("image/jpeg".to_string()),
            size_bytes: 3,
        });
        let mut state = self.state.lock().unwrap();
        if let Some(file) = &file {
            state.files.insert(file.id.clone(), file.clone());
        }
        state.originals.insert(
            id.to_string(),
            OriginalPhoto {
                id: id.to_string(),
                album_id: ALBUM.to_string(),
                uploaded_by: "uploader".to_string(),
                file,
                deleted_at: None,
            },
        );
    }

    pub fn add_member(&self, album_id: &str, user_id: &str) {
        self.state
            .lock()
            .unwrap()
            .members
            .insert((album_id.to_string(), user_id.to_string()));
    }

    pub fn add_theme(&self, id: &str, prompt: Option<&str>) {
        self.state.lock().unwrap().themes.insert(
            id.to_string(),
            Theme {
                id: id.to_string(),
                name: id.to_string(),
                prompt: prompt.map(str::to_string),
            },
        );
    }

    pub fn fail_start_at(&self, step: Option<StartStep>) {
        *self.fail_start_at.lock().unwrap() = step;
    }

    pub fn balance(&self, user_id: &str) -> i32 {
        self.state.lock().unwrap().users[user_id].credits
    }

    pub fn generated(&self, id: &str) -> GeneratedPhoto {
        self.state.lock().unwrap().generated[id].clone()
    }

    pub fn generated_count(&self) -> usize {
        self.state.lock().unwrap().generated.len()
    }

    pub fn usages(&self, user_id: &str) -> Vec<CreditUsage> {
        self.state
            .lock()
            .unwrap()
            .usages
            .iter()
            .filter(|u| u.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }

    pub fn transitions(&self) -> Vec<(String, GenerationStatus, GenerationStatus)> {
        self.state.lock().unwrap().transitions.clone()
    }

    /// Move a row's start time into the past
    pub fn backdate(&self, id: &str, by: ChronoDuration) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.generated.get_mut(id) {
            row.started_at -= by;
        }
    }

    fn fail_locked(state: &mut State, generated_id: &str, message: &str, refund: bool) -> bool {
        let Some(row) = state.generated.get_mut(generated_id) else {
            return false;
        };
        if row.status != GenerationStatus::Processing {
            return false;
        }

        row.status = GenerationStatus::Failed;
        row.error_message = Some(message.to_string());
        row.finished_at = Some(Utc::now());
        let user_id = row.requested_by.clone();
        state.transitions.push((
            generated_id.to_string(),
            GenerationStatus::Processing,
            GenerationStatus::Failed,
        ));

        if refund {
            if let Some(user) = state.users.get_mut(&user_id) {
                user.credits += 1;
            }
            state.usages.push(CreditUsage {
                id: new_id(),
                user_id,
                generated_photo_id: Some(generated_id.to_string()),
                amount: -1,
                reason: REFUND_REASON.to_string(),
                created_at: Utc::now(),
            });
        }
        true
    }
}

#[async_trait]
impl GenerationRepository for MemoryRepository {
    async fn start_generation(
        &self,
        user_id: &str,
        original_photo_id: &str,
        theme_id: &str,
    ) -> GenerationResult<GeneratedPhoto> {
        let fail_at = *self.fail_start_at.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        // Work on a copy; it replaces the state only when every step succeeded
        let mut tx = state.clone();

        let credits = tx
            .users
            .get(user_id)
            .map(|u| u.credits)
            .ok_or_else(|| GenerationError::NotFound(format!("user {}", user_id)))?;
        if credits <= 0 {
            return Err(GenerationError::InsufficientCredits);
        }
        if !tx
            .originals
            .get(original_photo_id)
            .filter(|o| o.deleted_at.is_none())
            .is_some_and(|o| {
                tx.members
                    .contains(&(o.album_id.clone(), user_id.to_string()))
            })
        {
            return Err(GenerationError::NotFound(format!(
                "original photo {}",
                original_photo_id
            )));
        }
        if !tx.themes.contains_key(theme_id) {
            return Err(GenerationError::NotFound(format!("theme {}", theme_id)));
        }

        let generated = GeneratedPhoto {
            id: new_id(),
            status: GenerationStatus::Processing,
            original_photo_id: original_photo_id.to_string(),
            theme_id: Some(theme_id.to_string()),
            file_id: None,
            requested_by: user_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
        };
        tx.generated.insert(generated.id.clone(), generated.clone());
        if fail_at == Some(StartStep::InsertGenerated) {
            return Err(injected(StartStep::InsertGenerated));
        }

        if let Some(user) = tx.users.get_mut(user_id) {
            user.credits -= 1;
        }
        if fail_at == Some(StartStep::Debit) {
            return Err(injected(StartStep::Debit));
        }

        tx.usages.push(CreditUsage {
            id: new_id(),
            user_id: user_id.to_string(),
            generated_photo_id: Some(generated.id.clone()),
            amount: 1,
            reason: DEBIT_REASON.to_string(),
            created_at: Utc::now(),
        });
        if fail_at == Some(StartStep::InsertUsage) {
            return Err(injected(StartStep::InsertUsage));
        }

        *state = tx;
        Ok(generated)
    }

    async fn find_user(&self, user_id: &str) -> GenerationResult<Option<User>> {
        Ok(self.state.lock().unwrap().users.get(user_id).cloned())
    }

    async fn find_generated_photo(&self, id: &str) -> GenerationResult<Option<GeneratedPhoto>> {
        Ok(self.state.lock().unwrap().generated.get(id).cloned())
    }

    async fn find_original_photo(&self, id: &str) -> GenerationResult<Option<OriginalPhoto>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .originals
            .get(id)
            .filter(|o| o.deleted_at.is_none())
            .cloned())
    }

    async fn find_theme(&self, id: &str) -> GenerationResult<Option<Theme>> {
        Ok(self.state.lock().unwrap().themes.get(id).cloned())
    }

    async fn find_file(&self, id: &str) -> GenerationResult<Option<FileRecord>> {
        Ok(self.state.lock().unwrap().files.get(id).cloned())
    }

    async fn finish_generation(
        &self,
        generated_id: &str,
        file: &NewFile,
    ) -> GenerationResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state.generated.get_mut(generated_id) else {
            return Ok(false);
        };
        if row.status != GenerationStatus::Processing {
            return Ok(false);
        }

        row.status = GenerationStatus::Finished;
        row.file_id = Some(file.id.clone());
        row.finished_at = Some(Utc::now());
        state.transitions.push((
            generated_id.to_string(),
            GenerationStatus::Processing,
            GenerationStatus::Finished,
        ));
        state.files.insert(
            file.id.clone(),
            FileRecord {
                id: file.id.clone(),
                storage_key: file.storage_key.clone(),
                content_type: Some(file.content_type.clone()),
                size_bytes: file.size_bytes,
            },
        );
        Ok(true)
    }

    async fn fail_generation(
        &self,
        generated_id: &str,
        message: &str,
        refund: bool,
    ) -> GenerationResult<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::fail_locked(&mut state, generated_id, message, refund))
    }

    async fn fail_stale_generations(
        &self,
        started_before: DateTime<Utc>,
        message: &str,
        refund: bool,
    ) -> GenerationResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let stale: Vec<String> = state
            .generated
            .values()
            .filter(|g| g.status == GenerationStatus::Processing && g.started_at < started_before)
            .map(|g| g.id.clone())
            .collect();

        Ok(stale
            .into_iter()
            .filter(|id| Self::fail_locked(&mut state, id, message, refund))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    tasks: Mutex<Vec<(String, GenerationTask)>>,
    pub unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<(String, GenerationTask)> {
        self.tasks.lock().unwrap().clone()
    }

    /// Task as the queue would deliver it, with its job id filled in
    pub fn delivery(&self, task_id: &str) -> GenerationTask {
        let tasks = self.tasks.lock().unwrap();
        let (id, task) = tasks
            .iter()
            .find(|(id, _)| id == task_id)
            .expect("task was enqueued");
        GenerationTask {
            job_id: Some(id.clone()),
            ..task.clone()
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: &GenerationTask) -> GenerationResult<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GenerationError::QueueUnavailable(
                "connection refused".to_string(),
            ));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.tasks.lock().unwrap().push((id.clone(), task.clone()));
        Ok(id)
    }

    async fn status(&self, task_id: &str) -> GenerationResult<TaskStatus> {
        let known = self.tasks.lock().unwrap().iter().any(|(id, _)| id == task_id);
        Ok(if known {
            TaskStatus::Queued
        } else {
            TaskStatus::NotFound
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    pub downloads: AtomicUsize,
    pub uploads: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, bytes: &[u8], content_type: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Calls of any kind made so far
    pub fn calls(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
            + self.uploads.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn download(&self, key: &str) -> StorageResult<StoredObject> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.put(key, &bytes, content_type);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presign_put(
        &self,
        key: &str,
        _content_type: &str,
        ttl: Duration,
    ) -> StorageResult<String> {
        Ok(format!("memory://put/{}?ttl={}", key, ttl.as_secs()))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        Ok(format!("memory://get/{}?ttl={}", key, ttl.as_secs()))
    }
}

/// Scripted image edit API
pub struct FakeEditor {
    pub calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Duration>,
}

pub const EDITED_BYTES: &[u8] = b"restyled";

impl FakeEditor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageEditClient for FakeEditor {
    async fn edit_image(
        &self,
        prompt: &str,
        _image: Vec<u8>,
        _content_type: &str,
        _timeout: Duration,
    ) -> GenerationResult<EditedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(GenerationError::ExternalApi(message));
        }

        Ok(EditedImage {
            bytes: EDITED_BYTES.to_vec(),
            content_type: "image/png".to_string(),
            request_id: Some("req_test".to_string()),
        })
    }
}

/// Wired pipeline over the in-memory seams
pub struct Harness {
    pub repository: Arc<MemoryRepository>,
    pub queue: Arc<MemoryQueue>,
    pub store: Arc<MemoryStore>,
    pub editor: Arc<FakeEditor>,
    pub service: GenerationService,
    pub worker: GenerationWorker,
}

pub const USER: &str = "user_alice0001";
pub const ORIGINAL: &str = "orig_00000001";
pub const ALBUM: &str = "album_holiday1";
pub const THEME: &str = "theme_watercol";
pub const ORIGINAL_KEY: &str = "key_original01";

impl Harness {
    pub fn new(settings: GenerationSettings) -> Self {
        let repository = Arc::new(MemoryRepository::new());
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(MemoryStore::new());
        let editor = Arc::new(FakeEditor::new());
        let settings = Arc::new(settings);

        let service = GenerationService::new(repository.clone(), queue.clone(), settings.clone());
        let worker = GenerationWorker::new(
            repository.clone(),
            store.clone(),
            editor.clone(),
            settings,
        );

        Self {
            repository,
            queue,
            store,
            editor,
            service,
            worker,
        }
    }

    /// User with `credits`, one original photo with stored bytes and one theme
    pub fn seeded(settings: GenerationSettings, credits: i32) -> Self {
        let harness = Self::new(settings);
        harness.repository.add_user(USER, credits);
        harness.repository.add_member(ALBUM, USER);
        harness.repository.add_original(ORIGINAL, Some(ORIGINAL_KEY));
        harness
            .repository
            .add_theme(THEME, Some("Turn this photo into a watercolor painting"));
        harness.store.put(ORIGINAL_KEY, b"jpg", "image/jpeg");
        harness
    }
}
