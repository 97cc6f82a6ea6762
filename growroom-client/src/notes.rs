use std::sync::Arc;

use growroom_api::events;
use growroom_api::models::{DeleteNote, NewNote, Note, NoteStatus};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use time::macros::format_description;
use time::{Date, Time};

use crate::command::CommandEncoder;
use crate::error::{ClientError, Result};

/// A note as entered by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteDraft {
    pub title: String,
    pub date: Date,
    pub time: Time,
    pub status: NoteStatus,
}

#[derive(Debug, Clone)]
struct Entry {
    note: Note,
    provisional: bool,
}

/// Reminder notes mirrored from the backend.
///
/// Locally added notes stay provisional until the backend lists their id.
/// Deletions made while offline are queued and sent before the next list
/// request.
pub struct NoteBook {
    encoder: Arc<CommandEncoder>,
    entries: RwLock<Vec<Entry>>,
    deletions: Mutex<Vec<i64>>,
}

impl NoteBook {
    pub fn new(encoder: Arc<CommandEncoder>) -> Self {
        Self {
            encoder,
            entries: RwLock::new(Vec::new()),
            deletions: Mutex::new(Vec::new()),
        }
    }

    pub fn request_notes(&self) -> bool {
        self.flush_deletions();
        self.encoder.send_message(events::GET_CSV_NOTE, json!({}))
    }

    /// Sends queued deletions, keeping the ones that could not be sent.
    pub fn flush_deletions(&self) -> usize {
        let mut deletions = self.deletions.lock();
        let before = deletions.len();
        deletions.retain(|&id| !self.send_deletion(id));

        let sent = before - deletions.len();
        if sent > 0 {
            tracing::info!("Sent {} queued note deletions", sent);
        }
        sent
    }

    pub fn queued_deletions(&self) -> Vec<i64> {
        self.deletions.lock().clone()
    }

    fn send_deletion(&self, id: i64) -> bool {
        if !self.encoder.is_connected() {
            return false;
        }

        match serde_json::to_value(DeleteNote { note_id: id }) {
            Ok(payload) => self.encoder.send_message(events::DELETE_NOTE, payload),
            Err(e) => {
                tracing::error!("Failed to encode note deletion: {}", e);
                false
            }
        }
    }

    /// Replaces the confirmed notes with the backend's list.
    pub fn handle_response(&self, data: &Value) {
        if !data.is_array() {
            tracing::warn!("Dropping note list that is not an array");
            return;
        }

        let notes: Vec<Note> = match serde_json::from_value(data.clone()) {
            Ok(notes) => notes,
            Err(e) => {
                tracing::warn!("Dropping malformed note list: {}", e);
                return;
            }
        };

        let deletions = self.deletions.lock().clone();
        let notes: Vec<Note> = notes
            .into_iter()
            .filter(|note| !deletions.contains(&note.id))
            .collect();

        let mut entries = self.entries.write();
        let provisional: Vec<Entry> = entries
            .drain(..)
            .filter(|entry| entry.provisional && !notes.iter().any(|n| n.id == entry.note.id))
            .collect();

        let mut merged: Vec<Entry> = Vec::with_capacity(notes.len() + provisional.len());
        for note in notes {
            if merged.iter().any(|entry| entry.note.id == note.id) {
                continue;
            }
            merged.push(Entry {
                note,
                provisional: false,
            });
        }
        merged.extend(provisional);

        tracing::debug!("Note book holds {} notes", merged.len());
        *entries = merged;
    }

    /// Adds a provisional note and submits it when connected.
    pub fn add_note(&self, draft: NoteDraft) -> Result<Note> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(ClientError::InvalidNote(String::from("title must not be empty")));
        }

        let day = draft.date.format(format_description!("[year]-[month]-[day]"))?;
        let time = draft.time.format(format_description!("[hour]:[minute]"))?;
        let display = draft
            .date
            .format(format_description!("[month repr:short] [day padding:none]"))?;
        let time_to_do = format!("{day} {time}");

        let mut entries = self.entries.write();
        let id = entries.iter().map(|entry| entry.note.id).max().unwrap_or(0) + 1;

        let note = Note {
            id,
            title: title.to_string(),
            date: display,
            time_to_do: time_to_do.clone(),
            status: draft.status,
        };
        entries.push(Entry {
            note: note.clone(),
            provisional: true,
        });
        drop(entries);

        if self.encoder.is_connected() {
            let payload = NewNote {
                id,
                title: note.title.clone(),
                status: note.status,
                date: day,
                time,
                time_to_do,
            };
            self.encoder
                .send_message(events::ADD_NOTE, serde_json::to_value(payload)?);
        } else {
            tracing::warn!("Not connected, note {} kept locally", id);
        }

        Ok(note)
    }

    /// Removes a note locally and asks the backend to delete it, queueing
    /// the request while offline.
    pub fn delete_note(&self, id: i64) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|entry| entry.note.id != id);
            entries.len() != before
        };

        if !removed || self.send_deletion(id) {
            return removed;
        }

        tracing::warn!("Not connected, deletion of note {} queued", id);
        let mut deletions = self.deletions.lock();
        if !deletions.contains(&id) {
            deletions.push(id);
        }

        removed
    }

    pub fn notes(&self) -> Vec<Note> {
        self.entries.read().iter().map(|entry| entry.note.clone()).collect()
    }

    pub fn is_provisional(&self, id: i64) -> bool {
        self.entries
            .read()
            .iter()
            .any(|entry| entry.provisional && entry.note.id == id)
    }
}
