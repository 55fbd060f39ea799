//! Page navigation for the interactive front-end.
//!
//! ```text
//!          open_editor            open_classifier
//!   Edit <------------- Main -------------------> Classify
//!        --------------->    <-------------------
//!              back                   back
//! ```

use crate::error::{Error, Result};
use crate::models::Page;

/// Tracks which page is active. Holds nothing but the page tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageController {
    current: Page,
}

impl PageController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Page {
        self.current
    }

    pub fn open_editor(&mut self) -> Result<Page> {
        self.transition(Page::Main, Page::Edit, "open the editor")
    }

    pub fn open_classifier(&mut self) -> Result<Page> {
        self.transition(Page::Main, Page::Classify, "open the classifier")
    }

    pub fn back(&mut self) -> Result<Page> {
        match self.current {
            Page::Edit | Page::Classify => {
                self.current = Page::Main;
                Ok(self.current)
            }
            Page::Main => Err(Error::InvalidTransition {
                from: Page::Main,
                action: "go back",
            }),
        }
    }

    fn transition(&mut self, from: Page, to: Page, action: &'static str) -> Result<Page> {
        if self.current != from {
            return Err(Error::InvalidTransition {
                from: self.current,
                action,
            });
        }
        tracing::debug!(from = from.as_str(), to = to.as_str(), "page changed");
        self.current = to;
        Ok(to)
    }
}
