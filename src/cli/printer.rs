//! Indented `key: value` listing used by the list commands

use console::style;
use std::fmt::Display;
use std::io::{self, Write};

const INDENT: &str = "    ";

/// Writes nested sections of fields:
///
/// ```text
/// token: Test Token
///     manufacturer: Example Corp
///     flags:
///            rng
/// ```
pub struct ListPrinter<W: Write> {
    out: W,
    depth: usize,
}

impl<W: Write> ListPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out, depth: 0 }
    }

    fn indent(&mut self) -> io::Result<()> {
        for _ in 0..self.depth {
            self.out.write_all(INDENT.as_bytes())?;
        }
        Ok(())
    }

    /// Open a section; fields until the matching `end_section` nest under it
    pub fn start_section(&mut self, kind: &str, name: impl Display) -> io::Result<()> {
        self.indent()?;
        writeln!(self.out, "{}: {}", style(kind).bold(), name)?;
        self.depth += 1;
        Ok(())
    }

    pub fn end_section(&mut self) -> io::Result<()> {
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    pub fn field(&mut self, name: &str, value: impl Display) -> io::Result<()> {
        self.indent()?;
        writeln!(self.out, "{}: {}", name, value)
    }

    /// A field whose values go one per line beneath it
    pub fn list<I, T>(&mut self, name: &str, values: I) -> io::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        self.indent()?;
        writeln!(self.out, "{}:", name)?;
        for value in values {
            self.indent()?;
            writeln!(self.out, "       {}", value)?;
        }
        Ok(())
    }

    /// Unindented line, bypassing section structure
    pub fn line(&mut self, text: impl Display) -> io::Result<()> {
        writeln!(self.out, "{}", text)
    }
}
