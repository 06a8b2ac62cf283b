//! # 赛道标记解码
//!
//! 左右两侧各有一个标记传感器，编码为 2 位状态 `(left << 1) | right`，
//! 只在状态变化时处理，并保留最近 3 个历史状态。回到 0（两侧都无标记）时：
//!
//! | 前一状态 | 再前一状态 | 事件 |
//! |---|---|---|
//! | 2（仅左） | 0 | `FinishLine` |
//! | 1（仅右） | 0 | 速度模式切换：`Slow` / `Fast` 交替，从 `Slow` 开始 |
//! | 历史中出现 3（两侧） | - | `Intersection` |

use crate::speed::TrackEvent;
use serde::Serialize;

/// 解码出的标记事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerEvent {
    Slow,
    Fast,
    FinishLine,
    Intersection,
}

impl MarkerEvent {
    /// 送入控制循环的事件名
    pub fn code(&self) -> &'static str {
        match self {
            MarkerEvent::Slow => "slow",
            MarkerEvent::Fast => "fast",
            MarkerEvent::FinishLine => "finish",
            MarkerEvent::Intersection => "intersection",
        }
    }

    /// 对应的速度状态机事件（路口不影响速度）
    pub fn track_event(&self) -> Option<TrackEvent> {
        TrackEvent::parse(self.code())
    }
}

const NONE: u8 = 0;
const RIGHT: u8 = 1;
const LEFT: u8 = 2;
const BOTH: u8 = 3;

#[derive(Debug, Clone, Default)]
pub struct MarkerDecoder {
    last: u8,
    previous: u8,
    oldest: u8,
    precision_mode: bool,
}

impl MarkerDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一次两侧标记检测结果
    pub fn update(&mut self, left: bool, right: bool) -> Option<MarkerEvent> {
        let current = (u8::from(left) << 1) | u8::from(right);
        if current == self.last {
            return None;
        }

        let event = if current == NONE {
            self.decode_release()
        } else {
            None
        };

        self.oldest = self.previous;
        self.previous = self.last;
        self.last = current;

        if let Some(event) = event {
            tracing::debug!("Marker decoded: {:?}", event);
        }
        event
    }

    fn decode_release(&mut self) -> Option<MarkerEvent> {
        if self.last == LEFT && self.previous == NONE {
            Some(MarkerEvent::FinishLine)
        } else if self.last == RIGHT && self.previous == NONE {
            self.precision_mode = !self.precision_mode;
            Some(if self.precision_mode {
                MarkerEvent::Slow
            } else {
                MarkerEvent::Fast
            })
        } else if [self.last, self.previous, self.oldest].contains(&BOTH) {
            Some(MarkerEvent::Intersection)
        } else {
            None
        }
    }

    /// 当前是否处于精确（慢速）模式
    pub fn precision_mode(&self) -> bool {
        self.precision_mode
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
