use crate::{Driver, Error, OpenOptions, Response, Statement, StatementResult, Storage};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Event is an operation observed by a MemoryStorage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Execute(String, String),
    Workaround(String),
    Close(String),
    Delete(String),
}

/// MemoryStorage is a Storage double which records every operation of
/// itself and its drivers. Statements starting with `FAIL` fail. Opens, and
/// statements starting with `WAIT`, block while the storage is held.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    events: Mutex<Vec<Event>>,
    files: Mutex<HashSet<String>>,
    fail_open: Mutex<HashSet<String>>,
    held: Mutex<bool>,
    released: Condvar,
}

impl MemoryStorage {
    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    /// Executed SQL of `name`, in order.
    pub fn executed(&self, name: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Execute(db, sql) if db == name => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, expect: &Event) -> usize {
        self.events().iter().filter(|e| *e == expect).count()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.files.lock().unwrap().contains(name)
    }

    pub fn fail_open(&self, name: &str) {
        self.inner.fail_open.lock().unwrap().insert(name.to_string());
    }

    pub fn hold(&self) {
        *self.inner.held.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.inner.held.lock().unwrap() = false;
        self.inner.released.notify_all();
    }

    fn record(&self, event: Event) {
        self.inner.events.lock().unwrap().push(event);
    }

    fn wait_for_release(&self) {
        let held = self.inner.held.lock().unwrap();
        let _held = self.inner.released.wait_while(held, |held| *held).unwrap();
    }
}

impl Storage for MemoryStorage {
    type Driver = MemoryDriver;

    fn locate(&self, name: &str) -> Result<PathBuf, Error> {
        if name.is_empty() {
            return Err(Error::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(PathBuf::from(name))
    }

    fn open(&self, locator: &Path, _options: &OpenOptions) -> Result<MemoryDriver, Error> {
        let name = locator.display().to_string();
        self.wait_for_release();

        if self.inner.fail_open.lock().unwrap().contains(&name) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected open failure",
            )));
        }
        self.record(Event::Open(name.clone()));
        self.inner.files.lock().unwrap().insert(name.clone());

        Ok(MemoryDriver {
            name,
            storage: self.clone(),
            open: true,
        })
    }

    fn delete(&self, locator: &Path) -> Result<bool, Error> {
        let name = locator.display().to_string();
        self.record(Event::Delete(name.clone()));
        Ok(self.inner.files.lock().unwrap().remove(&name))
    }
}

pub struct MemoryDriver {
    name: String,
    storage: MemoryStorage,
    open: bool,
}

impl Driver for MemoryDriver {
    fn execute_batch(&mut self, statements: &[Statement]) -> Result<Vec<StatementResult>, Error> {
        if !self.open {
            return Err(Error::Closed {
                name: self.name.clone(),
            });
        }
        let mut results = Vec::new();

        for (index, statement) in statements.iter().enumerate() {
            self.storage
                .record(Event::Execute(self.name.clone(), statement.sql.clone()));

            if statement.sql.starts_with("WAIT") {
                self.storage.wait_for_release();
            }
            if statement.sql.starts_with("FAIL") {
                return Err(Error::Statement {
                    index,
                    sql_code: 1,
                    message: format!("injected failure of {}", statement.sql),
                });
            }
            results.push(StatementResult {
                rows_affected: index,
                ..Default::default()
            });
        }
        Ok(results)
    }

    fn close_now(&mut self) -> Result<(), Error> {
        if self.open {
            self.open = false;
            self.storage.record(Event::Close(self.name.clone()));
        }
        Ok(())
    }

    fn bug_workaround(&mut self) -> Result<(), Error> {
        self.storage.record(Event::Workaround(self.name.clone()));
        Ok(())
    }
}

/// Responses gathers the Responses of a Dispatcher under test.
pub struct Responses(mpsc::UnboundedReceiver<Response>);

pub fn responses() -> (mpsc::UnboundedSender<Response>, Responses) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Responses(rx))
}

impl Responses {
    /// Wait for the next Response, panicking if none arrives in time.
    pub fn next(&mut self) -> Response {
        let deadline = Instant::now() + Duration::from_secs(10);

        loop {
            match self.0.try_recv() {
                Ok(response) => return response,
                Err(mpsc::error::TryRecvError::Empty) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1))
                }
                Err(err) => panic!("expected a response: {err:?}"),
            }
        }
    }

    /// Wait for `n` Responses, ordered on their CallbackId.
    pub fn take(&mut self, n: usize) -> Vec<Response> {
        let mut out: Vec<_> = (0..n).map(|_| self.next()).collect();
        out.sort_by_key(|r| r.callback);
        out
    }

    /// Assert that no further Response is pending.
    pub fn assert_empty(&mut self) {
        if let Ok(response) = self.0.try_recv() {
            panic!("unexpected response {response:?}");
        }
    }
}
