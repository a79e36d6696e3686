//! Minimal XML tree for structured result output
//!
//! Just enough for `--xml-ui`: elements, attributes, text data, escaping.

#![forbid(unsafe_code)]

use std::fmt;

/// One XML element.
#[derive(Debug, Default, Clone)]
pub struct Xml {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Xml>,
    pub data: String,
}

impl Xml {
    pub fn new(name: &str) -> Xml {
        Xml {
            name: name.to_string(),
            ..Xml::default()
        }
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        self.attributes.push((key.to_string(), value.into()));
    }

    /// Append a fresh child element and return a handle to it.
    pub fn new_element(&mut self, name: &str) -> &mut Xml {
        self.children.push(Xml::new(name));
        self.children.last_mut().unwrap()
    }
}

fn escape(s: &str, out: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in s.chars() {
        match c {
            '&' => out.write_str("&amp;")?,
            '<' => out.write_str("&lt;")?,
            '>' => out.write_str("&gt;")?,
            '"' => out.write_str("&quot;")?,
            _ => fmt::Write::write_char(out, c)?,
        }
    }
    Ok(())
}

fn write_indented(x: &Xml, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    write!(f, "<{}", x.name)?;
    for (k, v) in &x.attributes {
        write!(f, " {k}=\"")?;
        escape(v, f)?;
        f.write_str("\"")?;
    }
    if x.children.is_empty() && x.data.is_empty() {
        return f.write_str("/>\n");
    }
    f.write_str(">")?;
    if x.children.is_empty() {
        escape(&x.data, f)?;
        return writeln!(f, "</{}>", x.name);
    }
    f.write_str("\n")?;
    if !x.data.is_empty() {
        for _ in 0..=indent {
            f.write_str("  ")?;
        }
        escape(&x.data, f)?;
        f.write_str("\n")?;
    }
    for c in &x.children {
        write_indented(c, indent + 1, f)?;
    }
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "</{}>", x.name)
}

impl fmt::Display for Xml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_indented(self, 0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_attributes_and_children() {
        let mut x = Xml::new("result");
        x.set_attribute("property", "p<1>");
        x.set_attribute("status", "FAILURE");
        let child = x.new_element("assignment");
        child.data = "q & 3".to_string();
        let text = x.to_string();
        assert!(text.starts_with("<result property=\"p&lt;1&gt;\" status=\"FAILURE\">"));
        assert!(text.contains("<assignment>q &amp; 3</assignment>"));
        assert!(text.ends_with("</result>\n"));
    }

    #[test]
    fn empty_element_self_closes() {
        let x = Xml::new("frame");
        assert_eq!(x.to_string(), "<frame/>\n");
    }
}
