use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// 2次元位置を表す構造体（ワールド/グリッド座標）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position2D {
    pub x: f64,
    pub y: f64,
}

impl Position2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 2点間のユークリッド距離
    pub fn distance(&self, other: &Position2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// ベクトルの長さ（原点からの距離）
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2)).sqrt()
    }

    /// 単位ベクトルに正規化（ゼロベクトルはそのまま）
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag > 0.0 {
            Self::new(self.x / mag, self.y / mag)
        } else {
            *self
        }
    }

    /// 線形補間
    ///
    /// `t = 0` で `self`、`t = 1` で `other` をそのまま返す形で計算します。
    pub fn lerp(&self, other: &Position2D, t: f64) -> Self {
        Self::new(
            self.x * (1.0 - t) + other.x * t,
            self.y * (1.0 - t) + other.y * t,
        )
    }

    /// 角度（度）方向の単位ベクトル
    pub fn from_angle_deg(angle_deg: f64) -> Self {
        let rad = math_utils::deg_to_rad(angle_deg);
        Self::new(rad.cos(), rad.sin())
    }

    /// 座標がすべて有限値かどうか
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Position2D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Position2D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Position2D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

impl std::fmt::Display for Position2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// 画面上の座標（アクチュエーション層のみが使用）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use super::Position2D;

    /// 度をラジアンに変換
    pub fn deg_to_rad(degrees: f64) -> f64 {
        degrees * std::f64::consts::PI / 180.0
    }

    /// 角度を-180度〜180度の範囲に正規化
    pub fn normalize_angle(angle_deg: f64) -> f64 {
        let mut normalized = angle_deg % 360.0;
        if normalized > 180.0 {
            normalized -= 360.0;
        } else if normalized <= -180.0 {
            normalized += 360.0;
        }
        normalized
    }

    /// 値を範囲内に収める（`f64::clamp` と違い min > max でも panic しない）
    pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
        value.max(min).min(max)
    }

    /// 経路の総延長（始点と終点は結ばない）
    pub fn polyline_length(points: &[Position2D]) -> f64 {
        points.windows(2).map(|w| w[0].distance(&w[1])).sum()
    }

    /// `from` に最も近い点のインデックス（同距離なら先に見つかった方）
    pub fn nearest_index(points: &[Position2D], from: &Position2D) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, p) in points.iter().enumerate() {
            let d = from.distance(p);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((i, d)),
            }
        }
        best.map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_and_lerp_endpoints() {
        let a = Position2D::new(0.0, 0.0);
        let b = Position2D::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
        assert_eq!(a.lerp(&b, 0.5), Position2D::new(1.5, 2.0));
    }

    #[test]
    fn test_normalize_angle() {
        assert_eq!(math_utils::normalize_angle(190.0), -170.0);
        assert_eq!(math_utils::normalize_angle(-180.0), 180.0);
        assert_eq!(math_utils::normalize_angle(45.0), 45.0);
    }

    #[test]
    fn test_clamp_and_nearest_index_tie() {
        assert_eq!(math_utils::clamp(20.0, 5.0, 15.0), 15.0);
        assert_eq!(math_utils::clamp(1.0, 5.0, 15.0), 5.0);

        let points = vec![
            Position2D::new(10.0, 0.0),
            Position2D::new(0.0, 10.0),
            Position2D::new(30.0, 0.0),
        ];
        assert_eq!(math_utils::nearest_index(&points, &Position2D::new(0.0, 0.0)), Some(0));
        assert_eq!(math_utils::nearest_index(&[], &Position2D::new(0.0, 0.0)), None);
    }

    #[test]
    fn test_angle_helpers() {
        let dir = Position2D::from_angle_deg(180.0);
        assert!((dir.x + 1.0).abs() < 1e-9 && dir.y.abs() < 1e-9);
        assert!(!Position2D::new(f64::NAN, 0.0).is_finite());
    }
}
