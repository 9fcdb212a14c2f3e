use crate::settings::TypingSettings;

/// Reveals a streamed answer a few characters at a time.
///
/// The cursor counts chars, not bytes, so the revealed prefix is always valid UTF-8.
/// Completed answers are shown whole on the first derivation.
#[derive(Debug, Clone)]
pub struct TypingController {
    streaming: bool,
    target: String,
    /// Revealed chars.
    cursor: usize,
    /// Byte offset matching `cursor`.
    cursor_byte: usize,
    chars_per_tick: usize,
}

impl TypingController {
    pub fn new(streaming: bool, settings: &TypingSettings) -> Self {
        Self {
            streaming,
            target: String::new(),
            cursor: 0,
            cursor_byte: 0,
            chars_per_tick: settings.chars_per_tick.max(1),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn revealed(&self) -> &str {
        &self.target[..self.cursor_byte]
    }

    pub fn revealed_chars(&self) -> usize {
        self.cursor
    }

    pub fn is_caught_up(&self) -> bool {
        self.cursor_byte == self.target.len()
    }

    /// Replaces the text being revealed.
    ///
    /// An extension of the current target keeps the cursor; unrelated text restarts the reveal.
    pub fn set_target(&mut self, text: &str) {
        if text == self.target {
            return;
        }

        let extends = text.starts_with(&self.target);
        self.target.clear();
        self.target.push_str(text);

        if !self.streaming {
            self.jump_to_end();
        } else if !extends {
            tracing::debug!("typing target replaced, restarting reveal");
            self.cursor = 0;
            self.cursor_byte = 0;
        }
    }

    /// Ending the stream flushes the remaining text at once.
    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
        if !streaming {
            self.jump_to_end();
        }
    }

    /// Advances the cursor by at most one tick's budget. Returns true when output changed.
    pub fn tick(&mut self) -> bool {
        if self.is_caught_up() {
            return false;
        }

        let remaining = &self.target[self.cursor_byte..];
        let (advanced_bytes, advanced_chars) = remaining
            .char_indices()
            .take(self.chars_per_tick)
            .fold((0, 0), |(_, count), (offset, ch)| {
                (offset + ch.len_utf8(), count + 1)
            });

        self.cursor_byte += advanced_bytes;
        self.cursor += advanced_chars;
        true
    }

    fn jump_to_end(&mut self) {
        self.cursor = self.target.chars().count();
        self.cursor_byte = self.target.len();
    }
}
