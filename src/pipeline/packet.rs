//! Type-erased, reference-counted packets.
//!
//! A `Packet` pairs a shared immutable payload with a `Timestamp`. Cloning a
//! packet bumps the reference count; the payload is dropped when the last
//! queue or consumer releases it. A packet with no payload is "empty" and is
//! what handlers present on ports that have nothing at the invocation
//! timestamp.

use crate::error::{Error, Result};
use crate::pipeline::timestamp::Timestamp;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

struct Holder<T> {
    value: T,
}

trait HolderBase: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_id(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> HolderBase for Holder<T> {
    fn as_any(&self) -> &dyn Any {
        &self.value
    }

    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Immutable timestamped value flowing on a stream or held as a side packet.
#[derive(Clone)]
pub struct Packet {
    holder: Option<Arc<dyn HolderBase>>,
    timestamp: Timestamp,
}

impl Packet {
    /// Wrap `value` in a new packet with an unset timestamp.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            holder: Some(Arc::new(Holder { value })),
            timestamp: Timestamp::UNSET,
        }
    }

    /// A packet with no payload.
    pub fn empty() -> Self {
        Self {
            holder: None,
            timestamp: Timestamp::UNSET,
        }
    }

    /// Return a packet sharing this payload at `timestamp`.
    pub fn at(&self, timestamp: Timestamp) -> Packet {
        Packet {
            holder: self.holder.clone(),
            timestamp,
        }
    }

    /// Rebind in place, consuming `self`.
    pub fn into_at(mut self, timestamp: Timestamp) -> Packet {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.holder.is_none()
    }

    /// Borrow the payload as `T`.
    pub fn get<T: Any>(&self) -> Result<&T> {
        let holder = self.holder.as_ref().ok_or(Error::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual: "<empty>",
        })?;
        holder
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| Error::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: holder.type_name(),
            })
    }

    /// Check that the payload is a `T` without borrowing it.
    pub fn validate_as<T: Any>(&self) -> Result<()> {
        self.get::<T>().map(|_| ())
    }

    /// `TypeId` of the payload, `None` for an empty packet.
    pub fn type_id(&self) -> Option<TypeId> {
        self.holder.as_ref().map(|h| HolderBase::type_id(h.as_ref()))
    }

    pub fn type_name(&self) -> &'static str {
        self.holder
            .as_ref()
            .map(|h| h.type_name())
            .unwrap_or("<empty>")
    }

    /// True when both packets share the same payload allocation.
    pub fn shares_payload(&self, other: &Packet) -> bool {
        match (&self.holder, &other.holder) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.type_name())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Declared type of a port or side packet in a calculator contract.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Accepts any payload.
    Any,
    /// Exactly this payload type.
    Exact {
        id: TypeId,
        name: &'static str,
    },
    /// The port carries no values, only timestamp bounds.
    None,
}

impl PacketType {
    pub fn of<T: Any>() -> Self {
        PacketType::Exact {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Any => "<any>",
            PacketType::Exact { name, .. } => *name,
            PacketType::None => "<none>",
        }
    }

    /// Whether a producer of `self` may feed a consumer of `other`.
    pub fn is_compatible_with(&self, other: &PacketType) -> bool {
        match (self, other) {
            (PacketType::Any, _) | (_, PacketType::Any) => true,
            (PacketType::None, PacketType::None) => true,
            (PacketType::Exact { id: a, .. }, PacketType::Exact { id: b, .. }) => a == b,
            _ => false,
        }
    }

    /// Check a concrete packet against this declared type.
    pub fn validate(&self, packet: &Packet) -> Result<()> {
        match self {
            PacketType::Any => Ok(()),
            PacketType::None => {
                if packet.is_empty() {
                    Ok(())
                } else {
                    Err(Error::TypeMismatch {
                        expected: "<none>",
                        actual: packet.type_name(),
                    })
                }
            }
            PacketType::Exact { id, name } => {
                if packet.type_id() == Some(*id) {
                    Ok(())
                } else {
                    Err(Error::TypeMismatch {
                        expected: *name,
                        actual: packet.type_name(),
                    })
                }
            }
        }
    }
}

impl Default for PacketType {
    fn default() -> Self {
        PacketType::Any
    }
}

impl fmt::Debug for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketType({})", self.name())
    }
}
