//! Message frame layout and the transaction context.
//!
//! An I2O message is a small array of little-endian 32-bit words living in
//! IOP-owned shared memory. The host and the IOP exchange *frame addresses*
//! through two hardware FIFOs; the words themselves are copied in and out by
//! the bus layer. The layout of the first five words is fixed by the
//! protocol and is the only part of the wire format the core interprets:
//!
//! ```text
//! word 0: [ size in words | SGL offset | flags | version ]
//! word 1: [ command << 24 | initiator TID << 12 | target TID ]
//! word 2: initiator context (returned verbatim in the reply)
//! word 3: transaction context (free for the initiator, unused by the core)
//! word 4: (replies) [ reply status << 24 | detailed status ]
//! ```
//!
//! Word 2 is bit-packed on the wire but is never handled as a raw integer
//! outside this module: [`TransactionContext`] is the in-memory form, and
//! `encode`/`decode` are the only places that know the packing.

use core::fmt;

/// Protocol version stamped into word 0 of every outgoing message.
pub const I2O_VERSION_11: u32 = 0x01;

/// Value read from either FIFO when no frame is available.
pub const EMPTY_QUEUE: u32 = 0xFFFF_FFFF;

/// Minimum (and default) message frame size in bytes.
pub const MSG_FRAME_BYTES: usize = 128;
/// Minimum (and default) message frame size in 32-bit words.
pub const MSG_FRAME_WORDS: usize = MSG_FRAME_BYTES / 4;
/// Number of reply frames the host hands to the IOP's outbound free pool.
pub const OUTBOUND_FRAME_COUNT: u32 = 128;

/// `MSG_FAIL` bit in word 0 of a reply: the IOP could not deliver the
/// original request and is returning it in a failure envelope.
pub const MSG_FAIL: u32 = 1 << 13;

/// SGL offset field values for word 0 (offset in words, shifted into place).
pub const SGL_OFFSET_0: u32 = 0;
pub const SGL_OFFSET_4: u32 = 4 << 4;
pub const SGL_OFFSET_5: u32 = 5 << 4;
pub const SGL_OFFSET_6: u32 = 6 << 4;

/// Build word 0 from a message length in words and an SGL offset field.
#[inline]
pub const fn frame_head(words: u32, sgl_offset: u32) -> u32 {
    (words << 16) | sgl_offset | I2O_VERSION_11
}

/// Build word 1 from a command opcode and the two transaction addresses.
#[inline]
pub const fn frame_route(cmd: u8, initiator: Tid, target: Tid) -> u32 {
    ((cmd as u32) << 24) | ((initiator.0 as u32) << 12) | target.0 as u32
}

/// Command opcode from word 1 of a message.
#[inline]
pub const fn frame_cmd(word1: u32) -> u8 {
    (word1 >> 24) as u8
}

/// Initiator TID from word 1 of a message.
#[inline]
pub const fn frame_initiator(word1: u32) -> Tid {
    Tid(((word1 >> 12) & Tid::MASK) as u16)
}

/// Target TID from word 1 of a message.
#[inline]
pub const fn frame_target(word1: u32) -> Tid {
    Tid((word1 & Tid::MASK) as u16)
}

/// `true` if a reply's word 0 carries the message-failure bit.
#[inline]
pub const fn reply_failed(word0: u32) -> bool {
    word0 & MSG_FAIL != 0
}

/// Reply status byte from word 4 of a reply.
#[inline]
pub const fn reply_status(word4: u32) -> u8 {
    (word4 >> 24) as u8
}

/// Detailed status code from word 4 of a reply.
#[inline]
pub const fn reply_detail(word4: u32) -> u16 {
    word4 as u16
}

// =============================================================================
// Target IDs
// =============================================================================

/// Target ID: the 12-bit address of a logical device within an IOP.
///
/// TIDs are assigned by the IOP and are never reused for the lifetime of the
/// system (vendor-confirmed behavior the LCT reconciliation relies on).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u16);

impl Tid {
    pub const MASK: u32 = 0xFFF;

    /// TID 0: the IOP executive itself.
    pub const IOP: Self = Self(0);
    /// TID 1: the host operating system.
    pub const HOST: Self = Self(1);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw & Self::MASK as u16)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {:03x}", self.0)
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({:#05x})", self.0)
    }
}

// =============================================================================
// Handler contexts
// =============================================================================

/// Index of a registered reply handler in the handler table.
///
/// The context rides in the low bits of message word 2 and routes the reply
/// back to the right handler when the IOP answers.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HandlerContext(u8);

impl HandlerContext {
    /// Hard capacity of the handler table; contexts are always below this.
    pub const LIMIT: usize = 32;

    /// `None` if `index` is outside the handler table.
    #[inline]
    pub const fn new(index: usize) -> Option<Self> {
        if index < Self::LIMIT {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx {}", self.0)
    }
}

// =============================================================================
// Transaction context (message word 2)
// =============================================================================

/// Post-wait marker: the high bit of word 2 distinguishes a synchronous call
/// from a fire-and-forget post at dispatch time.
const CTX_POST_WAIT: u32 = 0x8000_0000;
/// The post-wait token occupies bits 16..31 of word 2.
const CTX_TOKEN_SHIFT: u32 = 16;
const CTX_TOKEN_MASK: u32 = 0x7FFF;
const CTX_HANDLER_MASK: u32 = 0xFFFF;

/// Decoded form of message word 2.
///
/// The bit-packing exists only on the wire; everything above the transport
/// boundary works with this enum.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransactionContext {
    /// An asynchronous post; the reply goes straight to the handler.
    FireAndForget { handler: HandlerContext },
    /// A synchronous call; the reply completes the waiter carrying `token`
    /// before the handler sees anything.
    PostWait { handler: HandlerContext, token: u16 },
}

impl TransactionContext {
    /// Pack into wire form for message word 2.
    #[inline]
    pub const fn encode(self) -> u32 {
        match self {
            Self::FireAndForget { handler } => handler.index() as u32,
            Self::PostWait { handler, token } => {
                CTX_POST_WAIT
                    | (((token as u32) & CTX_TOKEN_MASK) << CTX_TOKEN_SHIFT)
                    | handler.index() as u32
            }
        }
    }

    /// Unpack from message word 2 of a reply.
    ///
    /// `None` means the handler bits do not name a valid table slot, which
    /// the dispatch path treats as a protocol error (log and drop).
    #[inline]
    pub const fn decode(word: u32) -> Option<Self> {
        let handler = match HandlerContext::new((word & CTX_HANDLER_MASK) as usize) {
            Some(h) => h,
            None => return None,
        };
        if word & CTX_POST_WAIT != 0 {
            let token = ((word >> CTX_TOKEN_SHIFT) & CTX_TOKEN_MASK) as u16;
            Some(Self::PostWait { handler, token })
        } else {
            Some(Self::FireAndForget { handler })
        }
    }

    /// The handler the reply is addressed to, whichever variant it is.
    #[inline]
    pub const fn handler(self) -> HandlerContext {
        match self {
            Self::FireAndForget { handler } => handler,
            Self::PostWait { handler, .. } => handler,
        }
    }
}
