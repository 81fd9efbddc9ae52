//! DGML rendering of a configuration's part graph for external viewers.

use std::fmt::Write;

use crate::configuration::Configuration;

impl Configuration {
    /// Render the part graph as a DGML document: one node per part, one
    /// link per satisfied import (importer to producer, labeled with the
    /// contract name).
    pub fn to_dgml(&self) -> String {
        let mut dgml = String::new();
        dgml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        dgml.push_str("<DirectedGraph xmlns=\"http://schemas.microsoft.com/vs/2009/dgml\">\n");

        dgml.push_str("  <Nodes>\n");
        for part in self.parts() {
            let _ = writeln!(
                dgml,
                "    <Node Id=\"{}\" Label=\"{}\" Category=\"{}\" />",
                escape(&part.definition.type_ref.to_string()),
                escape(part.definition.type_ref.name()),
                if part.definition.is_shared { "Shared" } else { "NonShared" },
            );
        }
        dgml.push_str("  </Nodes>\n");

        dgml.push_str("  <Links>\n");
        for part in self.parts() {
            for (binding, exports) in &part.satisfying_exports {
                for export in exports {
                    let _ = writeln!(
                        dgml,
                        "    <Link Source=\"{}\" Target=\"{}\" Label=\"{}\" />",
                        escape(&part.definition.type_ref.to_string()),
                        escape(&export.part.type_ref.to_string()),
                        escape(&binding.import.contract_name),
                    );
                }
            }
        }
        dgml.push_str("  </Links>\n");

        dgml.push_str("</DirectedGraph>\n");
        dgml
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
