//! Incremental reader for the export document.
//!
//! The root is either an array of threads or an object carrying a `threads`
//! array. Threads are decoded and handed to the callback one at a time, so
//! memory stays bounded by the largest single thread.

use std::fmt;
use std::io::{BufReader, Read};

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};

use super::export::ExportThread;
use crate::error::CoreError;

pub(super) fn for_each_thread<R, F>(reader: R, mut on_thread: F) -> Result<(), CoreError>
where
    R: Read,
    F: FnMut(ExportThread) -> Result<(), CoreError>,
{
    let mut failure: Option<CoreError> = None;
    let mut de = serde_json::Deserializer::from_reader(BufReader::new(reader));
    let result = serde::Deserializer::deserialize_any(
        &mut de,
        RootVisitor {
            on_thread: &mut on_thread,
            failure: &mut failure,
        },
    );
    match (result, failure) {
        (_, Some(err)) => Err(err),
        (Err(err), None) => Err(CoreError::Json(err)),
        (Ok(()), None) => {
            de.end()?;
            Ok(())
        }
    }
}

struct RootVisitor<'a, F> {
    on_thread: &'a mut F,
    failure: &'a mut Option<CoreError>,
}

impl<'de, 'a, F> Visitor<'de> for RootVisitor<'a, F>
where
    F: FnMut(ExportThread) -> Result<(), CoreError>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of threads or an object with a `threads` array")
    }

    fn visit_seq<A>(self, seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        drain_threads(seq, self.on_thread, self.failure)
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let RootVisitor { on_thread, failure } = self;
        while let Some(key) = map.next_key::<String>()? {
            if key == "threads" {
                map.next_value_seed(ThreadList {
                    on_thread: &mut *on_thread,
                    failure: &mut *failure,
                })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

struct ThreadList<'a, F> {
    on_thread: &'a mut F,
    failure: &'a mut Option<CoreError>,
}

impl<'de, 'a, F> DeserializeSeed<'de> for ThreadList<'a, F>
where
    F: FnMut(ExportThread) -> Result<(), CoreError>,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de, 'a, F> Visitor<'de> for ThreadList<'a, F>
where
    F: FnMut(ExportThread) -> Result<(), CoreError>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of threads")
    }

    fn visit_unit<E>(self) -> Result<(), E>
    where
        E: de::Error,
    {
        Ok(())
    }

    fn visit_seq<A>(self, seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        drain_threads(seq, self.on_thread, self.failure)
    }
}

fn drain_threads<'de, A, F>(mut seq: A, on_thread: &mut F, failure: &mut Option<CoreError>) -> Result<(), A::Error>
where
    A: SeqAccess<'de>,
    F: FnMut(ExportThread) -> Result<(), CoreError>,
{
    while let Some(thread) = seq.next_element::<ExportThread>()? {
        if let Err(err) = on_thread(thread) {
            *failure = Some(err);
            return Err(<A::Error as de::Error>::custom("thread handler failed"));
        }
    }
    Ok(())
}
