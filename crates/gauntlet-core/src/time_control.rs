use serde::{Deserialize, Serialize};

/// 1対局・片側分の持ち時間設定。
///
/// `base_ms`/`increment_ms` がフィッシャー式の持ち時間、`move_time_ms` は
/// 1手固定時間。`depth`/`nodes` は探索量の上限。複数同時指定も許される。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    #[serde(default)]
    pub base_ms: u64,
    #[serde(default)]
    pub increment_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
}

impl TimeControl {
    pub fn with_base(base_ms: u64, increment_ms: u64) -> Self {
        Self {
            base_ms,
            increment_ms,
            ..Self::default()
        }
    }

    pub fn with_move_time(move_time_ms: u64) -> Self {
        Self {
            move_time_ms: Some(move_time_ms),
            ..Self::default()
        }
    }

    /// 壁時計式の持ち時間を持つか。
    pub fn has_wall_clock(&self) -> bool {
        self.base_ms > 0
    }

    /// `moves` 手消化した時点までの総予算 (ms)。
    pub fn total_budget_ms(&self, moves: u32) -> u64 {
        self.base_ms
            .saturating_add(self.increment_ms.saturating_mul(u64::from(moves)))
    }
}

/// 1手ぶんの探索予算。手番が回ってくるたびに GameRecord から再計算され、
/// 保存はされない。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GoLimits {
    pub wtime_ms: u64,
    pub btime_ms: u64,
    pub winc_ms: u64,
    pub binc_ms: u64,
    pub move_time_ms: Option<u64>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    /// 壁時計式の持ち時間が有効か。false なら go infinite 相当。
    pub has_time_control: bool,
    pub infinite: bool,
}

impl GoLimits {
    /// 解析用の無制限探索。
    pub fn infinite() -> Self {
        Self {
            infinite: true,
            ..Self::default()
        }
    }

    /// 両者の TimeControl と消費時間・消化手数から残り時間を導出する。
    ///
    /// per-move 上限 (move_time/depth/nodes) は手番側の設定を採用する。
    pub fn from_controls(
        white_tc: &TimeControl,
        black_tc: &TimeControl,
        white_elapsed_ms: u64,
        black_elapsed_ms: u64,
        white_moves: u32,
        black_moves: u32,
        white_to_move: bool,
    ) -> Self {
        let mover_tc = if white_to_move { white_tc } else { black_tc };
        let has_time_control = mover_tc.has_wall_clock();
        Self {
            wtime_ms: white_tc.total_budget_ms(white_moves).saturating_sub(white_elapsed_ms),
            btime_ms: black_tc.total_budget_ms(black_moves).saturating_sub(black_elapsed_ms),
            winc_ms: white_tc.increment_ms,
            binc_ms: black_tc.increment_ms,
            move_time_ms: mover_tc.move_time_ms,
            depth: mover_tc.depth,
            nodes: mover_tc.nodes,
            has_time_control,
            infinite: !has_time_control
                && mover_tc.move_time_ms.is_none()
                && mover_tc.depth.is_none()
                && mover_tc.nodes.is_none(),
        }
    }

    pub fn remaining_for(&self, white: bool) -> u64 {
        if white { self.wtime_ms } else { self.btime_ms }
    }

    pub fn increment_for(&self, white: bool) -> u64 {
        if white { self.winc_ms } else { self.binc_ms }
    }

    /// 同時に有効な制限の個数。underrun 検査は 1 のときだけ行う。
    pub fn limit_count(&self) -> usize {
        usize::from(self.has_time_control)
            + usize::from(self.move_time_ms.is_some())
            + usize::from(self.depth.is_some())
            + usize::from(self.nodes.is_some())
    }

    /// 手番側がこの1手で使い切ってよい壁時計時間 (ms)。
    ///
    /// 持ち時間制では残り時間+増分、固定時間では move_time。どちらも無い
    /// 場合は None (=無制限)。
    pub fn hard_budget_ms(&self, white: bool) -> Option<u64> {
        if self.has_time_control {
            Some(self.remaining_for(white).saturating_add(self.increment_for(white)))
        } else {
            self.move_time_ms
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_limits_subtracts_elapsed_and_adds_increments() {
        let tc = TimeControl::with_base(60_000, 1_000);
        let limits = GoLimits::from_controls(&tc, &tc, 4_000, 2_500, 3, 3, true);
        // 60_000 + 3 * 1_000 - elapsed
        assert_eq!(limits.wtime_ms, 59_000);
        assert_eq!(limits.btime_ms, 60_500);
        assert_eq!(limits.winc_ms, 1_000);
        assert!(limits.has_time_control);
        assert!(!limits.infinite);
        assert_eq!(limits.limit_count(), 1);
        assert_eq!(limits.hard_budget_ms(true), Some(60_000));
    }

    #[test]
    fn go_limits_without_any_cap_is_infinite() {
        let tc = TimeControl::default();
        let limits = GoLimits::from_controls(&tc, &tc, 0, 0, 0, 0, true);
        assert!(limits.infinite);
        assert_eq!(limits.limit_count(), 0);
        assert_eq!(limits.hard_budget_ms(true), None);
    }

    #[test]
    fn limit_count_tracks_simultaneous_caps() {
        let mover = TimeControl {
            move_time_ms: Some(1_000),
            depth: Some(12),
            ..TimeControl::default()
        };
        let other = TimeControl::default();
        let limits = GoLimits::from_controls(&mover, &other, 0, 0, 0, 0, true);
        assert_eq!(limits.limit_count(), 2);
        assert_eq!(limits.hard_budget_ms(true), Some(1_000));
    }

    #[test]
    fn remaining_never_goes_negative() {
        let tc = TimeControl::with_base(1_000, 0);
        let limits = GoLimits::from_controls(&tc, &tc, 5_000, 0, 1, 1, true);
        assert_eq!(limits.wtime_ms, 0);
    }
}
