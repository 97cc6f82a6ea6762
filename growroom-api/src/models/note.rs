use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteStatus {
    #[default]
    Planned,
    Completed,
}

/// Reminder note as exchanged with the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Server assigned identifier, provisional until echoed back
    pub id: i64,
    pub title: String,
    /// Display date, e.g. `Oct 16`
    pub date: String,
    /// Combined `YYYY-MM-DD HH:MM`
    pub time_to_do: String,
    pub status: NoteStatus,
}

/// Payload of `add_note`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub id: i64,
    pub title: String,
    pub status: NoteStatus,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub time_to_do: String,
}

/// Payload of `delete_note`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNote {
    pub note_id: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_note_wire_format() {
        let note = Note {
            id: 3,
            title: String::from("Change filters"),
            date: String::from("Oct 16"),
            time_to_do: String::from("2026-10-16 09:30"),
            status: NoteStatus::Planned,
        };

        assert_eq!(
            serde_json::to_value(&note).unwrap(),
            json!({
                "id": 3,
                "title": "Change filters",
                "date": "Oct 16",
                "timeToDo": "2026-10-16 09:30",
                "status": "Planned"
            })
        );
        assert_eq!(
            serde_json::to_value(DeleteNote { note_id: 3 }).unwrap(),
            json!({ "noteId": 3 })
        );
    }
}
