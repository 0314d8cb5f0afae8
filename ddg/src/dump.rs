//! DOT and XML serialization of the dependence graph.
//!
//! Both formats order nodes and edges canonically (by id, then by edge
//! content), so two graphs with equal content serialize byte-for-byte
//! equal regardless of mutation history. Node attributes carry the stable
//! id, which is what makes the dumps usable for scheduler debugging.

use std::fmt::Write;

use crate::{DdgView, Ddg};

impl Ddg<'_> {
    /// GraphViz rendering of the whole graph.
    pub fn dot_string(&self, group_by_cycle: bool) -> String {
        let view = DdgView {
            nodes: self.nodes().collect(),
            edges: self.edge_records().map(|(id, _)| id).collect(),
        };
        self.dot_string_view(&view, group_by_cycle)
    }

    /// GraphViz rendering of a node/edge selection.
    pub fn dot_string_view(&self, view: &DdgView, group_by_cycle: bool) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "digraph {} {{", sanitize(&self.name));
        if group_by_cycle {
            // One cluster per cycle, unscheduled nodes outside any cluster.
            let mut last_cycle: Option<i32> = None;
            let mut sorted: Vec<_> = view
                .nodes
                .iter()
                .map(|n| (self.store().node(*n).cycle, *n))
                .collect();
            sorted.sort();
            for (cycle, node) in sorted {
                match cycle {
                    Some(c) => {
                        if last_cycle != Some(c) {
                            if last_cycle.is_some() {
                                let _ = writeln!(s, "  }}");
                            }
                            let _ = writeln!(s, "  subgraph cluster_{c} {{");
                            let _ = writeln!(s, "    label=\"cycle {c}\";");
                            last_cycle = Some(c);
                        }
                        let _ = writeln!(s, "    {}", self.dot_node(node));
                    }
                    None => {
                        if last_cycle.is_some() {
                            let _ = writeln!(s, "  }}");
                            last_cycle = None;
                        }
                        let _ = writeln!(s, "  {}", self.dot_node(node));
                    }
                }
            }
            if last_cycle.is_some() {
                let _ = writeln!(s, "  }}");
            }
        } else {
            for node in &view.nodes {
                let _ = writeln!(s, "  {}", self.dot_node(*node));
            }
        }
        let mut lines: Vec<String> = view
            .edges
            .iter()
            .map(|id| {
                let rec = self.edge(*id);
                let style = if rec.edge.is_back_edge() {
                    ",style=dashed"
                } else if rec.edge.is_false_dep() {
                    ",style=dotted"
                } else {
                    ""
                };
                format!(
                    "  n{} -> n{} [label=\"{}\"{}];",
                    rec.tail.as_u32(),
                    rec.head.as_u32(),
                    rec.edge,
                    style
                )
            })
            .collect();
        lines.sort();
        for line in lines {
            let _ = writeln!(s, "{line}");
        }
        let _ = writeln!(s, "}}");
        s
    }

    fn dot_node(&self, node: ttac_program::MoveNodeId) -> String {
        let n = self.store().node(node);
        let cycle = n
            .cycle
            .map(|c| format!("\\n@{c}"))
            .unwrap_or_default();
        format!(
            "n{} [label=\"{}: {}{}\"];",
            node.as_u32(),
            node.as_u32(),
            n.mov,
            cycle
        )
    }

    /// XML dump of nodes and edges, canonical order.
    pub fn xml_string(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "<ddg name=\"{}\">", escape(&self.name));
        for node in self.nodes() {
            let n = self.store().node(node);
            let _ = write!(s, "  <node id=\"{}\"", node.as_u32());
            if let Some(c) = n.cycle {
                let _ = write!(s, " cycle=\"{c}\"");
            }
            let _ = writeln!(s, ">{}</node>", escape(&n.mov.to_string()));
        }
        let mut lines: Vec<String> = self
            .edge_records()
            .map(|(_, rec)| {
                format!(
                    "  <edge tail=\"{}\" head=\"{}\" dist=\"{}\">{}</edge>",
                    rec.tail.as_u32(),
                    rec.head.as_u32(),
                    rec.edge.loop_distance,
                    escape(&rec.edge.to_string())
                )
            })
            .collect();
        lines.sort();
        for line in lines {
            let _ = writeln!(s, "{line}");
        }
        let _ = writeln!(s, "</ddg>");
        s
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
