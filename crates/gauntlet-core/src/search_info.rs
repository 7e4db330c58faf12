use serde::{Deserialize, Serialize};

/// UCI `info` 行のスナップショット。
///
/// score は cp / mate のどちらか一方のみ保持する。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipv: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_cp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_mate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currmove: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pv: Vec<String>,
}

impl SearchInfo {
    /// `info ...` 行を解析する。info 行でなければ None。
    pub fn parse(line: &str) -> Option<SearchInfo> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return None;
        }
        let mut out = SearchInfo::default();
        let mut i = 1;
        while i < tokens.len() {
            match tokens[i] {
                "depth" => {
                    if i + 1 < tokens.len() {
                        out.depth = tokens[i + 1].parse::<u32>().ok();
                        i += 1;
                    }
                }
                "seldepth" => {
                    if i + 1 < tokens.len() {
                        out.seldepth = tokens[i + 1].parse::<u32>().ok();
                        i += 1;
                    }
                }
                "multipv" => {
                    if i + 1 < tokens.len() {
                        out.multipv = tokens[i + 1].parse::<u32>().ok();
                        i += 1;
                    }
                }
                "nodes" => {
                    if i + 1 < tokens.len() {
                        out.nodes = tokens[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "nps" => {
                    if i + 1 < tokens.len() {
                        out.nps = tokens[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "time" => {
                    if i + 1 < tokens.len() {
                        out.time_ms = tokens[i + 1].parse::<u64>().ok();
                        i += 1;
                    }
                }
                "currmove" => {
                    if i + 1 < tokens.len() {
                        out.currmove = Some(tokens[i + 1].to_string());
                        i += 1;
                    }
                }
                "score" => {
                    if i + 2 < tokens.len() {
                        match tokens[i + 1] {
                            "cp" => {
                                out.score_cp = tokens[i + 2].parse::<i32>().ok();
                                out.score_mate = None;
                                i += 2;
                            }
                            "mate" => {
                                out.score_mate = tokens[i + 2].parse::<i32>().ok();
                                out.score_cp = None;
                                i += 2;
                            }
                            _ => {}
                        }
                    }
                }
                "pv" => {
                    let mut pv = Vec::new();
                    let mut j = i + 1;
                    while j < tokens.len() {
                        pv.push(tokens[j].to_string());
                        j += 1;
                    }
                    if !pv.is_empty() {
                        out.pv = pv;
                    }
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        Some(out)
    }

    pub fn has_pv(&self) -> bool {
        !self.pv.is_empty()
    }

    pub fn pv_text(&self) -> String {
        self.pv.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_primary_fields_and_pv() {
        let info = SearchInfo::parse(
            "info depth 10 seldepth 12 multipv 1 nodes 12345 time 67 nps 890 score cp 34 pv e2e4 e7e5",
        )
        .unwrap();
        assert_eq!(info.depth, Some(10));
        assert_eq!(info.seldepth, Some(12));
        assert_eq!(info.multipv, Some(1));
        assert_eq!(info.nodes, Some(12_345));
        assert_eq!(info.time_ms, Some(67));
        assert_eq!(info.nps, Some(890));
        assert_eq!(info.score_cp, Some(34));
        assert_eq!(info.score_mate, None);
        assert_eq!(info.pv, vec!["e2e4".to_string(), "e7e5".to_string()]);
    }

    #[test]
    fn parse_keeps_score_exclusive() {
        let info = SearchInfo::parse("info depth 20 score mate 3 pv d1h5").unwrap();
        assert_eq!(info.score_mate, Some(3));
        assert_eq!(info.score_cp, None);
        assert!(info.has_pv());
    }

    #[test]
    fn parse_reads_currmove_without_pv() {
        let info = SearchInfo::parse("info depth 8 currmove g1f3 currmovenumber 2").unwrap();
        assert_eq!(info.currmove.as_deref(), Some("g1f3"));
        assert!(!info.has_pv());
    }

    #[test]
    fn parse_rejects_non_info_lines() {
        assert!(SearchInfo::parse("bestmove e2e4").is_none());
    }
}
