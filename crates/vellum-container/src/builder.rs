use tracing::debug;
use vellum_object::{Dictionary, FilterService, Name, Object, ObjRef, Stream};

use crate::error::{ContainerError, ContainerResult};

/// Default cap on members per container.
pub const DEFAULT_MAX_MEMBERS: usize = 100;

/// Accumulates serialized indirect objects into one object-stream container.
///
/// The builder is byte-oriented: members arrive already serialized, and the
/// finished product is a [`Stream`] node ready to be assigned a fresh number
/// by the caller. Streams and non-zero generations are rejected up front.
#[derive(Debug)]
pub struct ContainerBuilder {
    members: Vec<(ObjRef, Vec<u8>)>,
    max_members: usize,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMBERS)
    }
}

impl ContainerBuilder {
    pub fn new(max_members: usize) -> Self {
        Self {
            members: Vec::new(),
            max_members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members
    }

    /// Queue one member. `serialized` is the object body only (no
    /// `obj`/`endobj` framing — members are addressed by position).
    pub fn add_member(&mut self, reference: ObjRef, serialized: Vec<u8>) -> ContainerResult<()> {
        if self.is_full() {
            return Err(ContainerError::Full {
                max: self.max_members,
            });
        }
        if reference.generation != 0 {
            return Err(ContainerError::NonZeroGeneration(reference));
        }
        self.members.push((reference, serialized));
        Ok(())
    }

    /// Refuse stream nodes before serialization even starts.
    pub fn check_member(reference: ObjRef, object: &Object) -> ContainerResult<()> {
        if matches!(object, Object::Stream(_)) {
            return Err(ContainerError::StreamMember(reference));
        }
        if reference.generation != 0 {
            return Err(ContainerError::NonZeroGeneration(reference));
        }
        Ok(())
    }

    /// Member references in insertion order (their container positions).
    pub fn member_refs(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.members.iter().map(|(r, _)| *r)
    }

    /// Serialize the index sub-stream plus member bodies, compress, and wrap
    /// the result as an `/ObjStm` stream node.
    pub fn finish(self, filters: &dyn FilterService) -> ContainerResult<Stream> {
        let mut index = Vec::new();
        let mut bodies = Vec::new();
        for (reference, bytes) in &self.members {
            index.extend_from_slice(format!("{} {} ", reference.number, bodies.len()).as_bytes());
            bodies.extend_from_slice(bytes);
            bodies.push(b' ');
        }

        let first = index.len();
        let mut body = index;
        body.extend_from_slice(&bodies);

        let filter_name = Name::new("ZstdDecode");
        let compressed = filters
            .encode(&filter_name, &body)
            .map_err(ContainerError::Filter)?;

        debug!(
            members = self.members.len(),
            raw = body.len(),
            compressed = compressed.len(),
            "container sealed"
        );

        let mut dict = Dictionary::new();
        dict.insert(Name::new("Type"), Object::name("ObjStm"));
        dict.insert(Name::new("N"), Object::Integer(self.members.len() as i64));
        dict.insert(Name::new("First"), Object::Integer(first as i64));
        dict.insert(Name::new("Filter"), Object::Name(filter_name));
        let mut stream = Stream::new(dict, compressed);
        stream.sync_length();
        Ok(stream)
    }
}
