use std::fmt::Write;

use crate::models::{AgentId, ExplorationRecord, Matching, PreferenceProfile};

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn profile_lines(profile: &PreferenceProfile) -> Vec<String> {
    profile
        .iter()
        .map(|(agent, list)| format!("{}: {}", agent, list))
        .collect()
}

fn matching_lines(matching: &Matching) -> Vec<String> {
    matching
        .iter()
        .map(|(proposer, receiver)| format!("{}→{}", proposer, receiver))
        .collect()
}

fn node(out: &mut String, id: &str, title: &str, lines: &[String]) {
    let mut label = String::from(title);
    for line in lines {
        label.push_str("\\n");
        label.push_str(&escape(line));
    }
    // Writing to a String cannot fail
    let _ = writeln!(out, "    {} [label=\"{}\"];", id, label);
}

/// Graphviz DOT description of one exploration record
///
/// Five boxes: the initial reports, the honest first round, the strategic
/// first round, the strategic second round and the outcome comparison.
pub fn render_dot(record: &ExplorationRecord) -> String {
    let mut out = String::new();
    out.push_str("digraph manipulation {\n");
    out.push_str("    rankdir=LR;\n");
    out.push_str("    node [shape=box, fontname=\"monospace\"];\n");

    let mut initial = profile_lines(&record.proposer_profile);
    initial.extend(profile_lines(&record.receiver_profile));
    node(&mut out, "init", "Initial preferences", &initial);

    node(
        &mut out,
        "honest",
        "Honest report",
        &matching_lines(&record.honest_first_round),
    );

    let mut round_one = vec![format!(
        "{} reports: {}",
        record.distinguished, record.false_report
    )];
    round_one.extend(matching_lines(&record.strategic_first_round));
    node(&mut out, "strategic_r1", "Strategic round 1", &round_one);

    let mut round_two: Vec<String> = record
        .revision_choice
        .keys()
        .filter_map(|agent| {
            record
                .second_round_profile
                .get(agent)
                .map(|list| format!("{}: {}", agent, list))
        })
        .collect();
    round_two.extend(matching_lines(&record.strategic_second_round));
    node(&mut out, "strategic_r2", "Strategic round 2", &round_two);

    let partner = |p: Option<&AgentId>| {
        p.map(ToString::to_string).unwrap_or_else(|| "-".to_string())
    };
    let outcome = vec![
        format!(
            "honest: {} → {} (rank {})",
            record.distinguished,
            partner(record.honest_partner()),
            record.honest_rank
        ),
        format!(
            "strategic: {} → {} (rank {})",
            record.distinguished,
            partner(record.strategic_partner()),
            record.strategic_rank
        ),
        format!("beneficial: {}", record.beneficial),
    ];
    node(&mut out, "outcome", "Outcome", &outcome);

    for (from, to) in [
        ("init", "honest"),
        ("init", "strategic_r1"),
        ("strategic_r1", "strategic_r2"),
        ("honest", "outcome"),
        ("strategic_r2", "outcome"),
    ] {
        let _ = writeln!(out, "    {} -> {};", from, to);
    }

    out.push_str("}\n");
    out
}
