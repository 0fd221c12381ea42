//! Test doubles: an in-memory notes API, a counting store and a notes mapping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::cache::{JsonAdapter, PayloadAdapter};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::paging::{PagePosition, PageStyle, PagedMapping, RemotePage};
use crate::repository::EntityMapping;
use crate::store::{PersistentStore, Record, SqliteRecordStore, Subscription};
use crate::transport::{Method, TransportClient, TransportError, TransportResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
  pub id: String,
  pub title: String,
}

impl Note {
  pub fn new(id: &str, title: &str) -> Self {
    Self {
      id: id.to_string(),
      title: title.to_string(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteDto {
  #[serde(default)]
  pub id: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
  pub id: String,
  pub title: String,
}

impl Record for NoteRecord {
  fn record_id(&self) -> &str {
    &self.id
  }
}

#[derive(Debug, Deserialize)]
struct NotesPage {
  items: Vec<NoteDto>,
  page: Option<u32>,
  total_pages: Option<u32>,
  next: Option<String>,
}

pub struct NoteMapping {
  style: PageStyle,
  adapter: JsonAdapter<Note>,
}

impl NoteMapping {
  pub fn new() -> Self {
    Self::with_style(PageStyle::Index)
  }

  pub fn with_style(style: PageStyle) -> Self {
    Self {
      style,
      adapter: JsonAdapter::new("note"),
    }
  }
}

impl EntityMapping for NoteMapping {
  type Domain = Note;
  type Remote = NoteDto;
  type Local = NoteRecord;

  fn entity_type(&self) -> &str {
    "note"
  }

  fn collection_path(&self) -> String {
    "/notes".to_string()
  }

  fn id_of(&self, item: &Note) -> String {
    item.id.clone()
  }

  fn encode_remote(&self, item: &Note) -> AppResult<Vec<u8>> {
    serde_json::to_vec(&NoteDto {
      id: item.id.clone(),
      title: item.title.clone(),
    })
    .map_err(|e| AppError::unknown(e.to_string()))
  }

  fn decode_remote(&self, body: &[u8]) -> AppResult<NoteDto> {
    serde_json::from_slice(body).map_err(|e| AppError::unknown(e.to_string()))
  }

  fn remote_to_domain(&self, remote: NoteDto) -> Note {
    Note {
      id: remote.id,
      title: remote.title,
    }
  }

  fn local_to_domain(&self, local: NoteRecord) -> Note {
    Note {
      id: local.id,
      title: local.title,
    }
  }

  fn domain_to_local(&self, item: &Note) -> NoteRecord {
    NoteRecord {
      id: item.id.clone(),
      title: item.title.clone(),
    }
  }

  fn cache_adapter(&self) -> &dyn PayloadAdapter<Note> {
    &self.adapter
  }
}

impl PagedMapping for NoteMapping {
  fn page_style(&self) -> PageStyle {
    self.style
  }

  fn decode_page(&self, body: &[u8]) -> AppResult<RemotePage<NoteDto>> {
    let page: NotesPage =
      serde_json::from_slice(body).map_err(|e| AppError::unknown(e.to_string()))?;
    let position = match (page.page, page.total_pages) {
      (Some(page), Some(total_pages)) => PagePosition::Indexed { page, total_pages },
      _ => PagePosition::Token {
        prev: None,
        next: page.next,
      },
    };
    Ok(RemotePage {
      items: page.items,
      position,
    })
  }
}

/// In-memory `/notes` REST collection.
#[derive(Default)]
pub struct FakeApi {
  notes: Mutex<Vec<Note>>,
  next_id: AtomicU64,
  requests: Mutex<Vec<(Method, String)>>,
  injected: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
  delay: Mutex<Option<Duration>>,
}

impl FakeApi {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_notes(count: usize) -> Self {
    let api = Self::new();
    for i in 1..=count {
      api.insert(Note::new(&format!("n{}", i), &format!("note {}", i)));
    }
    api.next_id.store(count as u64, Ordering::SeqCst);
    api
  }

  pub fn insert(&self, note: Note) {
    let mut notes = self.notes.lock().unwrap();
    notes.retain(|n| n.id != note.id);
    notes.push(note);
  }

  pub fn note(&self, id: &str) -> Option<Note> {
    self.notes.lock().unwrap().iter().find(|n| n.id == id).cloned()
  }

  pub fn note_ids(&self) -> Vec<String> {
    self.notes.lock().unwrap().iter().map(|n| n.id.clone()).collect()
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<(Method, String)> {
    self.requests.lock().unwrap().clone()
  }

  /// Answer the next request with `status` instead of handling it.
  pub fn fail_next_with_status(&self, status: u16) {
    self
      .injected
      .lock()
      .unwrap()
      .push_back(Ok(TransportResponse::failed(status, "injected failure")));
  }

  /// Answer the next request with `response` instead of handling it.
  pub fn respond_next_with(&self, response: TransportResponse) {
    self.injected.lock().unwrap().push_back(Ok(response));
  }

  /// Fail the next request before any response is received.
  pub fn fail_next_with(&self, error: TransportError) {
    self.injected.lock().unwrap().push_back(Err(error));
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  fn handle(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> TransportResponse {
    let (path, query) = path.split_once('?').unwrap_or((path, ""));
    let params: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
      .into_owned()
      .collect();
    let param = |name: &str| {
      params
        .iter()
        .find(|(k, _)| k == name)
        .and_then(|(_, v)| v.parse::<usize>().ok())
    };

    let id = path.strip_prefix("/notes/").map(str::to_string);
    match (method, id) {
      (Method::Get, None) => {
        let notes = self.notes.lock().unwrap();
        let json = if let Some(page) = param("page") {
          let per_page = param("per_page").unwrap_or(10).max(1);
          let total_pages = notes.len().div_ceil(per_page);
          let items: Vec<&Note> = notes.iter().skip((page - 1) * per_page).take(per_page).collect();
          serde_json::json!({ "items": items, "page": page, "total_pages": total_pages })
        } else {
          let limit = param("limit").unwrap_or(10).max(1);
          let offset = param("cursor").unwrap_or(0);
          let items: Vec<&Note> = notes.iter().skip(offset).take(limit).collect();
          let next = (offset + limit < notes.len()).then(|| (offset + limit).to_string());
          serde_json::json!({ "items": items, "next": next })
        };
        TransportResponse::ok(200, serde_json::to_vec(&json).unwrap())
      }
      (Method::Get, Some(id)) => match self.note(&id) {
        Some(note) => TransportResponse::ok(200, serde_json::to_vec(&note).unwrap()),
        None => TransportResponse::failed(404, "{\"error\":\"not found\"}"),
      },
      (Method::Post, None) => {
        let dto: NoteDto = match body.as_deref().map(serde_json::from_slice) {
          Some(Ok(dto)) => dto,
          _ => return TransportResponse::failed(422, "invalid note"),
        };
        // Client-chosen ids are kept, like a PUT-style create
        let id = if dto.id.is_empty() {
          let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
          format!("n{}", n)
        } else {
          dto.id
        };
        let note = Note::new(&id, &dto.title);
        self.insert(note.clone());
        TransportResponse::ok(201, serde_json::to_vec(&note).unwrap())
      }
      (Method::Put, Some(id)) => {
        if self.note(&id).is_none() {
          return TransportResponse::failed(404, "not found");
        }
        let dto: NoteDto = match body.as_deref().map(serde_json::from_slice) {
          Some(Ok(dto)) => dto,
          _ => return TransportResponse::failed(422, "invalid note"),
        };
        let note = Note::new(&id, &dto.title);
        self.insert(note.clone());
        TransportResponse::ok(200, serde_json::to_vec(&note).unwrap())
      }
      (Method::Delete, Some(id)) => {
        let mut notes = self.notes.lock().unwrap();
        let before = notes.len();
        notes.retain(|n| n.id != id);
        if notes.len() < before {
          TransportResponse::ok(204, Vec::new())
        } else {
          TransportResponse::failed(404, "not found")
        }
      }
      _ => TransportResponse::failed(405, "method not allowed"),
    }
  }
}

#[async_trait]
impl TransportClient for FakeApi {
  async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
  ) -> Result<TransportResponse, TransportError> {
    self
      .requests
      .lock()
      .unwrap()
      .push((method, path.to_string()));

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let injected = self.injected.lock().unwrap().pop_front();
    match injected {
      Some(outcome) => outcome,
      None => Ok(self.handle(method, path, body)),
    }
  }
}

/// SQLite store that counts calls and can be told to fail.
pub struct CountingStore<R> {
  inner: SqliteRecordStore<R>,
  pub gets: AtomicUsize,
  pub puts: AtomicUsize,
  pub deletes: AtomicUsize,
  pub fail_reads: AtomicBool,
  pub fail_writes: AtomicBool,
}

impl<R: Record> CountingStore<R> {
  pub fn new() -> Self {
    Self {
      inner: SqliteRecordStore::open_in_memory("test").unwrap(),
      gets: AtomicUsize::new(0),
      puts: AtomicUsize::new(0),
      deletes: AtomicUsize::new(0),
      fail_reads: AtomicBool::new(false),
      fail_writes: AtomicBool::new(false),
    }
  }

  pub fn calls(&self) -> usize {
    self.gets.load(Ordering::SeqCst)
      + self.puts.load(Ordering::SeqCst)
      + self.deletes.load(Ordering::SeqCst)
  }

  /// Direct access, bypassing the counters.
  pub fn peek(&self, id: &str) -> Option<R> {
    self.inner.get(id).unwrap()
  }

  pub fn seed(&self, record: &R) {
    self.inner.put(record).unwrap();
  }

  fn broken() -> AppError {
    AppError::new(ErrorKind::Database, "disk I/O error")
  }
}

impl<R: Record> PersistentStore<R> for CountingStore<R> {
  fn get(&self, id: &str) -> AppResult<Option<R>> {
    self.gets.fetch_add(1, Ordering::SeqCst);
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(Self::broken());
    }
    self.inner.get(id)
  }

  fn put(&self, record: &R) -> AppResult<()> {
    self.puts.fetch_add(1, Ordering::SeqCst);
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(Self::broken());
    }
    self.inner.put(record)
  }

  fn delete(&self, id: &str) -> AppResult<bool> {
    self.deletes.fetch_add(1, Ordering::SeqCst);
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(Self::broken());
    }
    self.inner.delete(id)
  }

  fn observe(&self, id: &str) -> Subscription<Option<R>> {
    self.inner.observe(id)
  }
}
