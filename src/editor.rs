//! Text editor collaborators
//!
//! The controller reads the text to save from an [`Editor`] and writes
//! decrypted text back into it. Plaintext lives nowhere else.

use crate::error::Result;
use std::fmt;
use zeroize::Zeroizing;

pub trait Editor {
    fn get_text(&self) -> Result<Zeroizing<String>>;

    fn set_text(&mut self, text: &str) -> Result<()>;

    fn clear(&mut self) -> Result<()> {
        self.set_text("")
    }
}

/// Editor backed by an in-memory buffer
#[derive(Default)]
pub struct BufferEditor {
    text: Zeroizing<String>,
}

impl fmt::Debug for BufferEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferEditor")
            .field("text_len", &self.text.len())
            .finish()
    }
}

impl BufferEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        Self {
            text: Zeroizing::new(text.to_owned()),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Editor for BufferEditor {
    fn get_text(&self) -> Result<Zeroizing<String>> {
        Ok(self.text.clone())
    }

    fn set_text(&mut self, text: &str) -> Result<()> {
        // Replace rather than mutate in place, so the old buffer is
        // zeroized as a whole.
        self.text = Zeroizing::new(text.to_owned());
        Ok(())
    }
}
