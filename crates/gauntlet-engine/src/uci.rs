//! UCI 行の組み立てと解析。状態は持たない。

use gauntlet_core::{GameRecord, GoLimits, StartPosition};

/// `position ...` コマンドを組み立てる。
pub fn position_command(record: &GameRecord) -> String {
    position_command_with_extra(record, None)
}

/// ponder 用に予測手を1手だけ足した `position ...` コマンド。
pub fn position_command_with_extra(record: &GameRecord, extra: Option<&str>) -> String {
    let mut cmd = match &record.start {
        StartPosition::Standard => String::from("position startpos"),
        StartPosition::Fen(fen) => format!("position fen {fen}"),
    };
    let mut moves: Vec<&str> = record.pre_moves.iter().map(String::as_str).collect();
    moves.extend(
        record
            .moves
            .iter()
            .filter(|m| !m.uci.is_empty())
            .map(|m| m.uci.as_str()),
    );
    if let Some(extra) = extra {
        moves.push(extra);
    }
    if !moves.is_empty() {
        cmd.push_str(" moves ");
        cmd.push_str(&moves.join(" "));
    }
    cmd
}

/// GoLimits から `go ...` コマンドを組み立てる。
pub fn go_command(limits: &GoLimits, ponder: bool) -> String {
    let mut cmd = String::from("go");
    if ponder {
        cmd.push_str(" ponder");
    }
    if limits.infinite {
        cmd.push_str(" infinite");
        return cmd;
    }
    if limits.has_time_control {
        cmd.push_str(&format!(
            " wtime {} btime {} winc {} binc {}",
            limits.wtime_ms, limits.btime_ms, limits.winc_ms, limits.binc_ms
        ));
    }
    if let Some(mt) = limits.move_time_ms {
        cmd.push_str(&format!(" movetime {mt}"));
    }
    if let Some(d) = limits.depth {
        cmd.push_str(&format!(" depth {d}"));
    }
    if let Some(n) = limits.nodes {
        cmd.push_str(&format!(" nodes {n}"));
    }
    if cmd == "go" || cmd == "go ponder" {
        cmd.push_str(" infinite");
    }
    cmd
}

/// `bestmove <move> [ponder <move>]` 行を解析する。
pub fn parse_bestmove(line: &str) -> Option<(String, Option<String>)> {
    let rest = line.strip_prefix("bestmove")?;
    let mut tokens = rest.split_whitespace();
    let best = tokens.next()?.to_string();
    let ponder = match tokens.next() {
        Some("ponder") => tokens.next().map(str::to_string),
        _ => None,
    };
    Some((best, ponder))
}

/// `option name <名前> type ...` 行からオプション名を取り出す。
pub fn parse_option_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix("option ")?;
    let mut tokens = rest.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next.to_string());
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_core::{MoveRecord, TimeControl};

    #[test]
    fn position_command_covers_startpos_fen_and_moves() {
        let mut record = GameRecord::new();
        assert_eq!(position_command(&record), "position startpos");

        record.pre_moves = vec!["e2e4".to_string()];
        let mut mv = MoveRecord::begin(1, 1);
        mv.uci = "e7e5".to_string();
        record.append(mv);
        assert_eq!(position_command(&record), "position startpos moves e2e4 e7e5");
        assert_eq!(
            position_command_with_extra(&record, Some("g1f3")),
            "position startpos moves e2e4 e7e5 g1f3"
        );

        let fen_record = GameRecord::from_start(
            StartPosition::Fen("8/8/8/8/8/8/8/K1k5 w - - 0 1".to_string()),
            Vec::new(),
        );
        assert_eq!(
            position_command(&fen_record),
            "position fen 8/8/8/8/8/8/8/K1k5 w - - 0 1"
        );
    }

    #[test]
    fn go_command_renders_each_limit_kind() {
        let tc = TimeControl::with_base(60_000, 1_000);
        let limits = GoLimits::from_controls(&tc, &tc, 0, 0, 0, 0, true);
        assert_eq!(
            go_command(&limits, false),
            "go wtime 60000 btime 60000 winc 1000 binc 1000"
        );
        assert_eq!(
            go_command(&limits, true),
            "go ponder wtime 60000 btime 60000 winc 1000 binc 1000"
        );

        let mt = TimeControl::with_move_time(1_500);
        let limits = GoLimits::from_controls(&mt, &mt, 0, 0, 0, 0, true);
        assert_eq!(go_command(&limits, false), "go movetime 1500");

        assert_eq!(go_command(&GoLimits::infinite(), false), "go infinite");
        assert_eq!(go_command(&GoLimits::default(), false), "go infinite");
    }

    #[test]
    fn parse_bestmove_reads_optional_ponder() {
        assert_eq!(
            parse_bestmove("bestmove e2e4 ponder e7e5"),
            Some(("e2e4".to_string(), Some("e7e5".to_string())))
        );
        assert_eq!(parse_bestmove("bestmove e2e4"), Some(("e2e4".to_string(), None)));
        assert_eq!(parse_bestmove("info depth 1"), None);
        assert_eq!(parse_bestmove("bestmove"), None);
    }

    #[test]
    fn parse_option_name_handles_multiword_names() {
        assert_eq!(
            parse_option_name("option name Clear Hash type button"),
            Some("Clear Hash".to_string())
        );
        assert_eq!(
            parse_option_name("option name Hash type spin default 16 min 1 max 1024"),
            Some("Hash".to_string())
        );
        assert_eq!(parse_option_name("id name engine"), None);
    }
}
