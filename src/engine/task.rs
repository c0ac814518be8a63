//! Download tasks and the deduplicating task queue.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use crate::weibo::media::{image_url, pick_mirror_host};

/// Characters that are not allowed in file or directory names.
const PATH_HOSTILE: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Directory name used when an account name sanitizes to nothing.
pub const FALLBACK_DIR_NAME: &str = "weibo_user";

/// Kind of media a task downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    Image,
    Video,
}

/// One unit of downloadable work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Stable identity used for deduplication.
    pub id: String,
    pub kind: TaskKind,
    /// Remote photo id the task belongs to.
    pub media_id: String,
    pub url: String,
    /// Sanitized target file name.
    pub filename: String,
}

impl Task {
    /// Image task served from a randomly chosen mirror host.
    pub fn image(photo_id: &str, base_name: &str) -> Self {
        Self::image_from(photo_id, base_name, image_url(pick_mirror_host(), photo_id))
    }

    /// Image task with an explicit source URL.
    pub fn image_from(photo_id: &str, base_name: &str, url: String) -> Self {
        Self {
            id: format!("img:{}", photo_id),
            kind: TaskKind::Image,
            media_id: photo_id.to_string(),
            url,
            filename: sanitize_file_name(&format!("{}.jpg", base_name)),
        }
    }

    /// Motion-photo companion clip. The URL is part of the identity, so the
    /// clip never collides with the still image of the same photo.
    pub fn video(photo_id: &str, base_name: &str, url: String, ext: &str) -> Self {
        Self {
            id: format!("vid:{}:{}", photo_id, url),
            kind: TaskKind::Video,
            media_id: photo_id.to_string(),
            filename: sanitize_file_name(&format!("{}{}", base_name, ext)),
            url,
        }
    }
}

/// `{postId}_{year}_{month}_{photoId}`
pub fn build_base_file_name(post_id: &str, year: &str, month: &str, photo_id: &str) -> String {
    format!("{}_{}_{}_{}", post_id, year, month, photo_id)
}

fn replace_hostile(name: &str) -> String {
    name.chars()
        .map(|c| if PATH_HOSTILE.contains(&c) { '_' } else { c })
        .collect()
}

pub fn sanitize_file_name(name: &str) -> String {
    if name.is_empty() {
        return "file.bin".to_string();
    }
    replace_hostile(name)
}

pub fn sanitize_dir_name(name: &str) -> String {
    let cleaned = replace_hostile(name);
    let cleaned = cleaned.trim();
    if cleaned.chars().all(|c| c == '.') {
        FALLBACK_DIR_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// FIFO work list that refuses task ids it has already seen this run.
///
/// Not synchronized on its own; the run state wraps it in a mutex so that
/// check-then-insert and pop are single steps.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    seen: HashSet<String>,
    drain_started: bool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the task unless its id was enqueued before. Returns whether it
    /// was inserted.
    pub fn enqueue(&mut self, task: Task) -> bool {
        if !self.seen.insert(task.id.clone()) {
            return false;
        }
        self.tasks.push_back(task);
        true
    }

    pub fn dequeue(&mut self) -> Option<Task> {
        let task = self.tasks.pop_front();
        if task.is_some() {
            self.drain_started = true;
        }
        task
    }

    /// Reverses the pending tasks. Refused once anything has been dequeued,
    /// so consumers never observe a reordering mid-drain.
    pub fn reverse_all(&mut self) -> bool {
        if self.drain_started {
            return false;
        }
        self.tasks.make_contiguous().reverse();
        true
    }

    /// Drops every pending task and returns how many were discarded. Seen
    /// ids are kept.
    pub fn clear(&mut self) -> usize {
        let discarded = self.tasks.len();
        self.tasks.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
