// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Control paragraphs.

Indices like `Packages` and `Sources`, as well as the package stores of
targets, are sequences of control paragraphs separated by empty lines. See
<https://www.debian.org/doc/debian-policy/ch-controlfields.html>.

Multi-line values keep their continuation lines verbatim, including the
leading whitespace, so paragraphs are written back exactly as they were read.
*/

use {
    crate::error::{DebianError, Result},
    futures::{AsyncBufRead, AsyncBufReadExt},
    std::{
        borrow::Cow,
        io::{BufRead, Write},
        str::FromStr,
    },
};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct ControlField<'a> {
    name: Cow<'a, str>,
    value: Cow<'a, str>,
}

impl<'a> ControlField<'a> {
    fn into_owned(self) -> ControlField<'static> {
        ControlField {
            name: Cow::Owned(self.name.into_owned()),
            value: Cow::Owned(self.value.into_owned()),
        }
    }
}

/// An ordered set of fields.
///
/// Field names are case insensitive on lookup and case preserving on set. A
/// name occurs at most once.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ControlParagraph<'a> {
    fields: Vec<ControlField<'a>>,
}

impl<'a> ControlParagraph<'a> {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Set a field, replacing an existing value in place.
    pub fn set_field_from_string(&mut self, name: Cow<'a, str>, value: Cow<'a, str>) {
        match self.position(&name) {
            Some(i) => self.fields[i].value = value,
            None => self.fields.push(ControlField { name, value }),
        }
    }

    /// Remove a field, returning its value if it was present.
    pub fn remove_field(&mut self, name: &str) -> Option<Cow<'a, str>> {
        self.position(name).map(|i| self.fields.remove(i).value)
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.fields
            .iter()
            .map(|f| (f.name.as_ref(), f.value.as_ref()))
    }

    /// The raw value of a field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.fields[i].value.as_ref())
    }

    pub fn required_field_str(&self, name: &str) -> Result<&str> {
        self.field_str(name)
            .ok_or_else(|| DebianError::ControlRequiredFieldMissing(name.to_string()))
    }

    /// The value of a field parsed as an integer.
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| u64::from_str(v.trim()).map_err(DebianError::from))
    }

    /// The non-empty lines of a field, leading whitespace removed.
    pub fn field_iter_value_lines(&self, name: &str) -> Option<impl Iterator<Item = &str> + '_> {
        self.field_str(name).map(|value| {
            value
                .lines()
                .map(|line| line.trim_start())
                .filter(|line| !line.is_empty())
        })
    }

    /// Write all fields, each terminated by a newline.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for (name, value) in self.iter_fields() {
            writeln!(writer, "{}: {}", name, value)?;
        }

        Ok(())
    }

    pub fn into_owned(self) -> ControlParagraph<'static> {
        ControlParagraph {
            fields: self
                .fields
                .into_iter()
                .map(ControlField::into_owned)
                .collect(),
        }
    }
}

/// Accumulates lines into paragraphs.
#[derive(Debug, Default)]
struct ParagraphBuilder {
    paragraph: ControlParagraph<'static>,
    field: Option<(String, String)>,
}

impl ParagraphBuilder {
    fn flush_field(&mut self) {
        if let Some((name, value)) = self.field.take() {
            self.paragraph
                .set_field_from_string(Cow::Owned(name), Cow::Owned(value));
        }
    }

    fn take_paragraph(&mut self) -> Option<ControlParagraph<'static>> {
        self.flush_field();

        if self.paragraph.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.paragraph))
        }
    }

    /// Feed a line, returning the paragraph it terminates, if any.
    fn push_line(&mut self, line: &str) -> Result<Option<ControlParagraph<'static>>> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);

        if line.trim().is_empty() {
            return Ok(self.take_paragraph());
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            return match self.field.as_mut() {
                Some((_, value)) => {
                    value.push('\n');
                    value.push_str(line.trim_end());
                    Ok(None)
                }
                None => Err(DebianError::ControlParseError(format!(
                    "continuation line without a field: '{}'",
                    line
                ))),
            };
        }

        self.flush_field();

        let (name, value) = line.split_once(':').ok_or_else(|| {
            DebianError::ControlParseError(format!("missing colon in line '{}'", line))
        })?;
        self.field = Some((name.trim().to_string(), value.trim().to_string()));

        Ok(None)
    }
}

/// Reads paragraphs from a [BufRead], one per iteration.
///
/// Iteration ends after the first error.
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    builder: Option<ParagraphBuilder>,
}

impl<R: BufRead> ControlParagraphReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            builder: Some(ParagraphBuilder::default()),
        }
    }

    fn read_paragraph(&mut self) -> Result<Option<ControlParagraph<'static>>> {
        let builder = match self.builder.as_mut() {
            Some(builder) => builder,
            None => return Ok(None),
        };

        let mut line = String::new();
        loop {
            line.clear();

            if self.reader.read_line(&mut line)? == 0 {
                let last = builder.take_paragraph();
                self.builder = None;
                return Ok(last);
            }

            if let Some(paragraph) = builder.push_line(&line)? {
                return Ok(Some(paragraph));
            }
        }
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_paragraph() {
            Ok(paragraph) => paragraph.map(Ok),
            Err(e) => {
                self.builder = None;
                Some(Err(e))
            }
        }
    }
}

/// Reads paragraphs from an [AsyncBufRead].
pub struct ControlParagraphAsyncReader<R> {
    reader: R,
    builder: Option<ParagraphBuilder>,
}

impl<R> ControlParagraphAsyncReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            builder: Some(ParagraphBuilder::default()),
        }
    }

    /// Read the next paragraph, [None] at end of input.
    pub async fn read_paragraph(&mut self) -> Result<Option<ControlParagraph<'static>>> {
        let builder = match self.builder.as_mut() {
            Some(builder) => builder,
            None => return Ok(None),
        };

        let mut line = String::new();
        loop {
            line.clear();

            if self.reader.read_line(&mut line).await? == 0 {
                let last = builder.take_paragraph();
                self.builder = None;
                return Ok(last);
            }

            match builder.push_line(&line) {
                Ok(Some(paragraph)) => return Ok(Some(paragraph)),
                Ok(None) => {}
                Err(e) => {
                    self.builder = None;
                    return Err(e);
                }
            }
        }
    }
}

/// Write paragraphs separated by empty lines.
pub fn write_paragraphs<'p, 'a: 'p, W: Write>(
    writer: &mut W,
    paragraphs: impl Iterator<Item = &'p ControlParagraph<'a>>,
) -> std::io::Result<()> {
    for (i, p) in paragraphs.enumerate() {
        if i > 0 {
            writer.write_all(b"\n")?;
        }
        p.write(writer)?;
    }

    Ok(())
}
