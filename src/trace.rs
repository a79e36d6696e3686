//! Counterexample traces
//!
//! A trace is the bit-accurate witness reconstructed from a satisfying
//! assignment: one frame per time step up to and including the failing
//! frame, each mapping state variables and inputs to concrete values.
//! Unconstrained bits stay `x` — the extractors never invent a value for a
//! bit the solver left free, so determined and don't-care bits remain
//! distinguishable in every output format.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use crate::xml::Xml;

/// One trace bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bit {
    Zero,
    One,
    X,
}

impl Bit {
    pub fn from_model(value: Option<bool>) -> Bit {
        match value {
            Some(true) => Bit::One,
            Some(false) => Bit::Zero,
            None => Bit::X,
        }
    }

    fn glyph(self) -> char {
        match self {
            Bit::Zero => '0',
            Bit::One => '1',
            Bit::X => 'x',
        }
    }
}

/// A concrete (possibly partially defined) bit-vector value, LSB first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BvValue {
    pub bits: Vec<Bit>,
}

impl BvValue {
    pub fn new(bits: Vec<Bit>) -> BvValue {
        BvValue { bits }
    }

    /// Fully-defined value from an integer.
    pub fn from_u64(value: u64, width: u32) -> BvValue {
        BvValue {
            bits: (0..width)
                .map(|i| {
                    if value >> i & 1 == 1 {
                        Bit::One
                    } else {
                        Bit::Zero
                    }
                })
                .collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.bits.len()
    }

    pub fn is_fully_defined(&self) -> bool {
        self.bits.iter().all(|b| *b != Bit::X)
    }

    /// Integer value, `None` if any bit is `x`.
    pub fn as_u64(&self) -> Option<u64> {
        let mut out = 0u64;
        for (i, b) in self.bits.iter().enumerate() {
            match b {
                Bit::One => out |= 1 << i,
                Bit::Zero => {}
                Bit::X => return None,
            }
        }
        Some(out)
    }

    /// MSB-first bit string, e.g. `1x0`.
    pub fn bit_string(&self) -> String {
        self.bits.iter().rev().map(|b| b.glyph()).collect()
    }
}

impl fmt::Display for BvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u64() {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "{}", self.bit_string()),
        }
    }
}

/// Values of one time frame.
#[derive(Debug, Clone, Default)]
pub struct TraceFrame {
    pub state: BTreeMap<String, BvValue>,
    pub inputs: BTreeMap<String, BvValue>,
}

/// A counterexample: frames 0 ..= failing frame.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub frames: Vec<TraceFrame>,
}

impl Trace {
    /// Index of the frame where the property fails (the last one).
    pub fn failing_frame(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    /// Plain-text dump, one block per frame.
    pub fn show_text(&self, out: &mut impl Write) -> io::Result<()> {
        for (t, frame) in self.frames.iter().enumerate() {
            writeln!(out, "state {t}")?;
            for (name, value) in &frame.state {
                writeln!(out, "  {name} = {value}")?;
            }
            for (name, value) in &frame.inputs {
                writeln!(out, "  input {name} = {value}")?;
            }
        }
        Ok(())
    }

    /// Structured form: `<counterexample>` with one `<frame>` per step.
    pub fn xml_element(&self) -> Xml {
        let mut cex = Xml::new("counterexample");
        for (t, frame) in self.frames.iter().enumerate() {
            let fx = cex.new_element("frame");
            fx.set_attribute("number", t.to_string());
            for (name, value) in frame.state.iter().chain(&frame.inputs) {
                let ax = fx.new_element("assignment");
                ax.set_attribute("variable", name.clone());
                ax.data = value.to_string();
            }
        }
        cex
    }

    /// Value-change-dump serialization: 1 ns time scale, full dump at
    /// frame 0, then only changed variables per frame.
    pub fn write_vcd(&self, module: &str, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "$timescale 1ns $end")?;
        writeln!(out, "$scope module {module} $end")?;

        let first = match self.frames.first() {
            Some(f) => f,
            None => {
                writeln!(out, "$upscope $end")?;
                writeln!(out, "$enddefinitions $end")?;
                return Ok(());
            }
        };
        // (name, id, width, is_state)
        let mut vars: Vec<(String, String, usize, bool)> = Vec::new();
        for (name, value) in &first.state {
            let id = vcd_id(vars.len());
            writeln!(out, "$var reg {} {} {} $end", value.width(), id, name)?;
            vars.push((name.clone(), id, value.width(), true));
        }
        for (name, value) in &first.inputs {
            let id = vcd_id(vars.len());
            writeln!(out, "$var wire {} {} {} $end", value.width(), id, name)?;
            vars.push((name.clone(), id, value.width(), false));
        }
        writeln!(out, "$upscope $end")?;
        writeln!(out, "$enddefinitions $end")?;

        let mut previous: BTreeMap<&str, &BvValue> = BTreeMap::new();
        for (t, frame) in self.frames.iter().enumerate() {
            writeln!(out, "#{t}")?;
            if t == 0 {
                writeln!(out, "$dumpvars")?;
            }
            for (name, id, _, is_state) in &vars {
                let value = if *is_state {
                    frame.state.get(name)
                } else {
                    frame.inputs.get(name)
                };
                let value = match value {
                    Some(v) => v,
                    None => continue,
                };
                if t > 0 && previous.get(name.as_str()) == Some(&value) {
                    continue;
                }
                if value.width() == 1 {
                    writeln!(out, "{}{}", value.bits[0].glyph(), id)?;
                } else {
                    writeln!(out, "b{} {}", value.bit_string(), id)?;
                }
                previous.insert(name.as_str(), value);
            }
            if t == 0 {
                writeln!(out, "$end")?;
            }
        }
        Ok(())
    }
}

/// Printable-ASCII identifier codes, the usual VCD scheme.
fn vcd_id(mut index: usize) -> String {
    let mut s = String::new();
    loop {
        s.push((b'!' + (index % 94) as u8) as char);
        index /= 94;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(state: &[(&str, u64, u32)], inputs: &[(&str, u64, u32)]) -> TraceFrame {
        let mut f = TraceFrame::default();
        for (n, v, w) in state {
            f.state.insert(n.to_string(), BvValue::from_u64(*v, *w));
        }
        for (n, v, w) in inputs {
            f.inputs.insert(n.to_string(), BvValue::from_u64(*v, *w));
        }
        f
    }

    #[test]
    fn partial_values_print_as_bit_strings() {
        let v = BvValue::new(vec![Bit::Zero, Bit::X, Bit::One]);
        assert_eq!(v.as_u64(), None);
        assert_eq!(v.to_string(), "1x0");
        let d = BvValue::from_u64(5, 3);
        assert_eq!(d.to_string(), "5");
    }

    #[test]
    fn xml_carries_frames_and_assignments() {
        let trace = Trace {
            frames: vec![frame(&[("q", 0, 2)], &[]), frame(&[("q", 1, 2)], &[])],
        };
        let xml = trace.xml_element().to_string();
        assert!(xml.contains("<frame number=\"0\">"));
        assert!(xml.contains("<assignment variable=\"q\">1</assignment>"));
    }

    /// A deliberately small VCD reader: enough to replay what `write_vcd`
    /// emits and check the round-trip invariant.
    fn parse_vcd(text: &str) -> Vec<BTreeMap<String, String>> {
        let mut ids: BTreeMap<String, String> = BTreeMap::new();
        let mut frames: Vec<BTreeMap<String, String>> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("$var ") {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                // reg <w> <id> <name> $end
                ids.insert(parts[2].to_string(), parts[3].to_string());
            } else if line.starts_with('#') {
                let carry = frames.last().cloned().unwrap_or_default();
                frames.push(carry);
            } else if let Some(rest) = line.strip_prefix('b') {
                let (value, id) = rest.split_once(' ').unwrap();
                let name = ids[id].clone();
                frames.last_mut().unwrap().insert(name, value.to_string());
            } else if line.len() >= 2
                && (line.starts_with('0') || line.starts_with('1') || line.starts_with('x'))
            {
                let (value, id) = line.split_at(1);
                let name = ids[id].clone();
                frames.last_mut().unwrap().insert(name, value.to_string());
            }
        }
        frames
    }

    #[test]
    fn vcd_round_trips_frame_values() {
        let trace = Trace {
            frames: vec![
                frame(&[("q", 0, 2)], &[("i", 1, 1)]),
                frame(&[("q", 1, 2)], &[("i", 1, 1)]),
                frame(&[("q", 2, 2)], &[("i", 0, 1)]),
            ],
        };
        let mut buf = Vec::new();
        trace.write_vcd("main", &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("$timescale 1ns $end"));
        assert!(text.contains("$dumpvars"));

        let frames = parse_vcd(&text);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["q"], "00");
        assert_eq!(frames[1]["q"], "01");
        assert_eq!(frames[2]["q"], "10");
        assert_eq!(frames[0]["i"], "1");
        // unchanged `i` at frame 1 was carried, not re-dumped
        assert_eq!(frames[1]["i"], "1");
        assert_eq!(frames[2]["i"], "0");
    }
}
