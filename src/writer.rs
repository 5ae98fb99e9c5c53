//! Element writer producing XML-RPC documents in the configured layout.
//!
//! Output goes through a `quick_xml::Writer`, which owns indentation: every
//! tag starts a new line except directly after text. On top of that the
//! writer holds each start tag back until it knows whether the element has
//! content, so an empty element comes out as `<x />` (or `<x></x>`).

use crate::error::Result;
use crate::settings::FormatSettings;
use quick_xml::Writer;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;

pub struct XmlWriter<'s, W: Write> {
    writer: Writer<W>,
    settings: &'s FormatSettings,
    open: Vec<&'static str>,
    /// Set while the innermost open element has not been written yet.
    pending: bool,
}

impl<'s, W: Write> XmlWriter<'s, W> {
    pub fn new(writer: W, settings: &'s FormatSettings) -> Self {
        let writer = if settings.use_indentation {
            Writer::new_with_indent(writer, b' ', settings.indentation)
        } else {
            Writer::new(writer)
        };
        XmlWriter {
            writer,
            settings,
            open: Vec::new(),
            pending: false,
        }
    }

    pub fn settings(&self) -> &'s FormatSettings {
        self.settings
    }

    /// Write the XML declaration unless the settings omit it.
    pub fn declaration(&mut self) -> Result<()> {
        if !self.settings.omit_xml_declaration {
            self.writer
                .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending {
            self.pending = false;
            if let Some(name) = self.open.last() {
                self.writer.write_event(Event::Start(BytesStart::new(*name)))?;
            }
        }
        Ok(())
    }

    pub fn start(&mut self, name: &'static str) -> Result<()> {
        self.flush_pending()?;
        self.open.push(name);
        self.pending = true;
        Ok(())
    }

    /// Write escaped character data inside the current element.
    pub fn text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.flush_pending()?;
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(partial_escape(text))))?;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        let Some(name) = self.open.pop() else {
            return Ok(());
        };
        if std::mem::take(&mut self.pending) {
            if self.settings.use_empty_element_tags {
                // `from_content` keeps the space before `/>`
                let content = format!("{} ", name);
                self.writer
                    .write_event(Event::Empty(BytesStart::from_content(content, name.len())))?;
            } else {
                self.writer.write_event(Event::Start(BytesStart::new(name)))?;
                // an empty text event keeps the end tag on the same line
                self.writer.write_event(Event::Text(BytesText::from_escaped("")))?;
                self.writer.write_event(Event::End(BytesEnd::new(name)))?;
            }
            return Ok(());
        }
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// `<name>text</name>`
    pub fn element(&mut self, name: &'static str, text: &str) -> Result<()> {
        self.start(name)?;
        self.text(text)?;
        self.end()
    }

    /// Close every open element.
    pub fn finish(&mut self) -> Result<()> {
        while !self.open.is_empty() {
            self.end()?;
        }
        self.writer.get_mut().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn render(settings: &FormatSettings, build: impl FnOnce(&mut XmlWriter<'_, &mut Vec<u8>>)) -> String {
        let mut out = Vec::new();
        let mut writer = XmlWriter::new(&mut out, settings);
        build(&mut writer);
        writer.finish().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_indented_layout() {
        let settings = FormatSettings {
            indentation: 4,
            ..FormatSettings::default()
        };
        let xml = render(&settings, |w| {
            w.declaration().unwrap();
            w.start("value").unwrap();
            w.start("nil").unwrap();
            w.end().unwrap();
            w.end().unwrap();
            w.element("name", "a<b").unwrap();
        });
        assert_eq!(
            xml,
            "<?xml version=\"1.0\"?>\n<value>\n    <nil />\n</value>\n<name>a&lt;b</name>"
        );
    }

    #[test]
    fn test_nested_indentation() {
        let xml = render(&FormatSettings::default(), |w| {
            w.start("value").unwrap();
            w.start("array").unwrap();
            w.start("data").unwrap();
            w.start("value").unwrap();
            w.element("i4", "7").unwrap();
            w.end().unwrap();
        });
        assert_eq!(
            xml,
            "<value>\n  <array>\n    <data>\n      <value>\n        <i4>7</i4>\n      </value>\n    </data>\n  </array>\n</value>"
        );
    }

    #[test]
    fn test_compact_full_close_tags() {
        let settings = FormatSettings {
            use_indentation: false,
            use_empty_element_tags: false,
            ..FormatSettings::default()
        };
        let xml = render(&settings, |w| {
            w.start("data").unwrap();
            w.end().unwrap();
            w.element("string", "").unwrap();
        });
        assert_eq!(xml, "<data></data><string></string>");
    }

    #[test]
    fn test_indented_full_close_tag_stays_on_one_line() {
        let settings = FormatSettings {
            use_empty_element_tags: false,
            ..FormatSettings::default()
        };
        let xml = render(&settings, |w| {
            w.start("params").unwrap();
            w.start("param").unwrap();
            w.end().unwrap();
            w.end().unwrap();
        });
        assert_eq!(xml, "<params>\n  <param></param>\n</params>");
    }

    #[test]
    fn test_text_escapes_markup_only() {
        let xml = render(&FormatSettings::compact(), |w| {
            w.element("string", "say \"hi\" & 'bye' <now>").unwrap();
        });
        assert_eq!(xml, "<string>say \"hi\" &amp; 'bye' &lt;now&gt;</string>");
    }

    #[test]
    fn test_text_keeps_children_inline() {
        let settings = FormatSettings::default();
        let xml = render(&settings, |w| {
            w.start("value").unwrap();
            w.text("x").unwrap();
            w.end().unwrap();
        });
        assert_eq!(xml, "<value>x</value>");
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_is_io_error() {
        let settings = FormatSettings::compact();
        let mut writer = XmlWriter::new(Broken, &settings);
        let err = writer.element("i4", "1").unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err}");
        assert!(!err.is_codec_error());
    }
}
