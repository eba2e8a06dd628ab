#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use depkit::{SingletonDef, Value};

/// Records component lifecycle events in the order they happen.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event '{event}' not recorded in {:?}", self.events()))
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Singleton journaling `start:<name>` / `stop:<name>` and yielding `value`.
pub fn journaled_singleton(journal: &Journal, name: &str, value: i64) -> SingletonDef {
    let (on_start, on_stop) = (journal.clone(), journal.clone());
    let (start_name, stop_name) = (name.to_string(), name.to_string());
    SingletonDef::from_fns(
        move |_| {
            let journal = on_start.clone();
            let name = start_name.clone();
            async move {
                journal.push(format!("start:{name}"));
                Ok(Value::data(value))
            }
        },
        move |_| {
            let journal = on_stop.clone();
            let name = stop_name.clone();
            async move {
                journal.push(format!("stop:{name}"));
                Ok(())
            }
        },
    )
}

/// Like [`journaled_singleton`], but each routine sleeps for its delay before
/// journaling, so overlapping starts and stops can be staged.
pub fn paced_singleton(
    journal: &Journal,
    name: &str,
    start_delay: Duration,
    stop_delay: Duration,
) -> SingletonDef {
    let (on_start, on_stop) = (journal.clone(), journal.clone());
    let (start_name, stop_name) = (name.to_string(), name.to_string());
    SingletonDef::from_fns(
        move |_| {
            let journal = on_start.clone();
            let name = start_name.clone();
            async move {
                tokio::time::sleep(start_delay).await;
                journal.push(format!("start:{name}"));
                Ok(Value::unit())
            }
        },
        move |_| {
            let journal = on_stop.clone();
            let name = stop_name.clone();
            async move {
                tokio::time::sleep(stop_delay).await;
                journal.push(format!("stop:{name}"));
                Ok(())
            }
        },
    )
}
