use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use fastrace::trace;
use roster_form::{validate_create, validate_edit, ImageSource, IMAGE_REQUIRED};
use roster_store::{Persistence, StorageError};
use roster_types::{Field, FieldErrorKind, FieldErrors, UserForm, UserId, UserRecord, ViewState};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{Commit, EncodedEdit, EncodedSubmit, PendingEdit, PendingSubmit, StoreError, StoreEvent};

const EVENT_CAPACITY: usize = 64;
const DEFAULT_IMAGE_LIMIT: u64 = 5 * 1024 * 1024;

fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The user collection, the current view and the storage mirror of the
/// collection. All mutation goes through here; storage is written before
/// subscribers hear about a change.
pub struct Store<P: Persistence> {
    users: Vec<UserRecord>,
    view: ViewState,
    generation: u64,
    persistence: P,
    events: broadcast::Sender<StoreEvent>,
    image_limit: u64,
    clock: fn() -> u64,
}

impl<P: Persistence> Store<P> {
    #[trace]
    pub fn open(persistence: P) -> Result<Self, StoreError> {
        let users = load_users(&persistence)?;
        info!("Loaded {} users", users.len());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            users,
            view: ViewState::Form,
            generation: 0,
            persistence,
            events,
            image_limit: DEFAULT_IMAGE_LIMIT,
            clock: system_clock,
        })
    }

    pub fn with_image_limit(mut self, limit: u64) -> Self {
        self.image_limit = limit;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    pub fn get(&self, id: UserId) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn selected(&self) -> Option<&UserRecord> {
        self.view.selected().and_then(|id| self.get(id))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Validates a create-form submission. Nothing changes until the result
    /// is encoded and passed to [`Store::complete_submit`].
    pub fn begin_submit(
        &self,
        form: UserForm,
        image: Option<Box<dyn ImageSource>>,
    ) -> Result<PendingSubmit, StoreError> {
        validate_create(&form, image.is_some())?;
        let Some(image) = image else {
            let mut errors = FieldErrors::new();
            errors.insert(Field::Image, FieldErrorKind::Required, IMAGE_REQUIRED);
            return Err(errors.into());
        };
        Ok(PendingSubmit {
            form,
            image,
            generation: self.generation,
            limit: self.image_limit,
        })
    }

    #[trace]
    pub fn complete_submit(&mut self, encoded: EncodedSubmit) -> Result<Commit, StoreError> {
        if encoded.generation != self.generation {
            debug!("Discarding submission started in an earlier view");
            return Ok(Commit::Discarded);
        }

        let id = self.next_id();
        let record = encoded.form.into_record(id, encoded.image);
        self.users.push(record.clone());
        if let Err(e) = self.persist() {
            self.users.pop();
            return Err(e.into());
        }

        info!("Added user {} ({})", id, record.name);
        self.emit(StoreEvent::UserAdded {
            id,
            count: self.users.len(),
        });
        self.set_view(ViewState::detail(id));
        Ok(Commit::Applied(record))
    }

    /// Validate, read the image, then commit.
    pub async fn submit(
        &mut self,
        form: UserForm,
        image: Option<Box<dyn ImageSource>>,
    ) -> Result<Commit, StoreError> {
        let pending = self.begin_submit(form, image)?;
        let encoded = pending.encode().await?;
        self.complete_submit(encoded)
    }

    // ------------------------------------------------------------------
    // Edit
    // ------------------------------------------------------------------

    pub fn begin_editing(&mut self) -> Result<(), StoreError> {
        let id = self.view.selected().ok_or(StoreError::NoSelection)?;
        self.set_view(ViewState::Detail { id, editing: true });
        Ok(())
    }

    pub fn cancel_edit(&mut self) -> Result<(), StoreError> {
        let id = self.view.selected().ok_or(StoreError::NoSelection)?;
        self.set_view(ViewState::detail(id));
        Ok(())
    }

    /// Validates an edit of the selected record.
    pub fn begin_edit_save(
        &self,
        form: UserForm,
        image: Option<Box<dyn ImageSource>>,
    ) -> Result<PendingEdit, StoreError> {
        let id = self.view.selected().ok_or(StoreError::NoSelection)?;
        if self.get(id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        validate_edit(&form)?;
        Ok(PendingEdit {
            id,
            form,
            image,
            generation: self.generation,
            limit: self.image_limit,
        })
    }

    #[trace]
    pub fn complete_edit(&mut self, encoded: EncodedEdit) -> Result<Commit, StoreError> {
        if encoded.generation != self.generation {
            debug!("Discarding edit of {} started in an earlier view", encoded.id);
            return Ok(Commit::Discarded);
        }

        let index = self
            .users
            .iter()
            .position(|u| u.id == encoded.id)
            .ok_or(StoreError::NotFound(encoded.id))?;

        let updated = self.users[index].with_form(&encoded.form, encoded.image);
        let previous = std::mem::replace(&mut self.users[index], updated.clone());
        if let Err(e) = self.persist() {
            self.users[index] = previous;
            return Err(e.into());
        }

        info!("Updated user {}", updated.id);
        self.emit(StoreEvent::UserUpdated { id: updated.id });
        self.set_view(ViewState::detail(updated.id));
        Ok(Commit::Applied(updated))
    }

    pub async fn save_edit(
        &mut self,
        form: UserForm,
        image: Option<Box<dyn ImageSource>>,
    ) -> Result<Commit, StoreError> {
        let pending = self.begin_edit_save(form, image)?;
        let encoded = pending.encode().await?;
        self.complete_edit(encoded)
    }

    // ------------------------------------------------------------------
    // Navigation and delete
    // ------------------------------------------------------------------

    pub fn view_user(&mut self, id: UserId) -> Result<&UserRecord, StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.set_view(ViewState::detail(id));
        self.get(id).ok_or(StoreError::NotFound(id))
    }

    pub fn back_to_form(&mut self) {
        self.set_view(ViewState::Form);
    }

    #[trace]
    pub fn delete_user(&mut self, id: UserId) -> Result<UserRecord, StoreError> {
        let index = self
            .users
            .iter()
            .position(|u| u.id == id)
            .ok_or(StoreError::NotFound(id))?;

        let removed = self.users.remove(index);
        if let Err(e) = self.persist() {
            self.users.insert(index, removed);
            return Err(e.into());
        }

        info!("Deleted user {} ({})", id, removed.name);
        self.emit(StoreEvent::UserDeleted {
            id,
            count: self.users.len(),
        });
        if self.view.selected() == Some(id) {
            self.set_view(ViewState::Form);
        }
        Ok(removed)
    }

    /// Re-reads storage, picking up writes made by another process. A
    /// selected record that disappeared leaves only the list on screen.
    #[trace]
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.users = load_users(&self.persistence)?;
        self.emit(StoreEvent::Reloaded {
            count: self.users.len(),
        });
        if let Some(id) = self.view.selected() {
            if self.get(id).is_none() {
                self.set_view(ViewState::ListOnly);
            }
        }
        Ok(())
    }

    /// The clock value, or one past the largest id when that is taken. At
    /// the top of the id range the nearest free id below the clock is used.
    fn next_id(&self) -> UserId {
        let now = (self.clock)();
        let taken = |id: u64| self.users.iter().any(|u| u.id.0 == id);
        if !taken(now) {
            return UserId(now);
        }
        let max = self.users.iter().map(|u| u.id.0).max().unwrap_or(now);
        if let Some(next) = max.checked_add(1) {
            return UserId(next);
        }
        let free = (0..now).rev().chain(now..u64::MAX).find(|id| !taken(*id));
        UserId(free.unwrap_or(now))
    }

    fn persist(&mut self) -> Result<(), StorageError> {
        if self.users.is_empty() {
            self.persistence.clear()
        } else {
            self.persistence.save(&self.users)
        }
    }

    fn set_view(&mut self, view: ViewState) {
        if self.view == view {
            return;
        }
        self.view = view;
        self.generation += 1;
        self.emit(StoreEvent::ViewChanged { view });
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn load_users<P: Persistence>(persistence: &P) -> Result<Vec<UserRecord>, StoreError> {
    let users = match persistence.load() {
        Ok(Some(users)) => users,
        Ok(None) => Vec::new(),
        Err(StorageError::Corrupt { key, message }) => {
            warn!("Ignoring unreadable user list under '{}': {}", key, message);
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let mut seen = HashSet::new();
    let total = users.len();
    let users: Vec<UserRecord> = users.into_iter().filter(|u| seen.insert(u.id)).collect();
    if users.len() < total {
        warn!("Dropped {} stored users with duplicate ids", total - users.len());
    }
    Ok(users)
}
