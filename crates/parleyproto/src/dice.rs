//! Dice-roll packing and presentation.

use rand::Rng;

/// Roll parameters packed into an `i32`: `{u8 count, u8 size, i16 modifier}`.
///
/// Rolls `count` uniform dice in `1..=size` (a zero-sided die contributes
/// nothing), adds the modifier, and renders `"NdM = total"`, with the
/// signed modifier shown when nonzero (`"2d6+3 = 11"`, `"2d6-1 = 4"`).
pub fn format_dice<R: Rng>(packed: i32, rng: &mut R) -> String {
    let b = packed.to_le_bytes();
    let count = b[0];
    let size = b[1];
    let add = i16::from_le_bytes([b[2], b[3]]);

    let mut total = i32::from(add);
    for _ in 0..count {
        if size > 0 {
            total += i32::from(rng.gen_range(1..=size));
        }
    }

    let mut out = format!("{count}d{size}");
    if add != 0 {
        out.push_str(&format!("{add:+}"));
    }
    out.push_str(&format!(" = {total}"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(count: u8, size: u8, add: i16) -> i32 {
        let a = add.to_le_bytes();
        i32::from_le_bytes([count, size, a[0], a[1]])
    }

    #[test]
    fn modifier_shape_and_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let s = format_dice(packed(2, 6, 3), &mut rng);
            let total: i32 = s.strip_prefix("2d6+3 = ").unwrap().parse().unwrap();
            assert!((5..=15).contains(&total), "{s}");
        }
    }

    #[test]
    fn negative_modifier() {
        let mut rng = rand::thread_rng();
        let s = format_dice(packed(2, 6, -1), &mut rng);
        let total: i32 = s.strip_prefix("2d6-1 = ").unwrap().parse().unwrap();
        assert!((1..=11).contains(&total));
    }

    #[test]
    fn one_sided_dice_are_deterministic() {
        let mut rng = rand::thread_rng();
        assert_eq!(format_dice(packed(3, 1, 0), &mut rng), "3d1 = 3");
    }

    #[test]
    fn degenerate_rolls() {
        let mut rng = rand::thread_rng();
        assert_eq!(format_dice(packed(0, 6, 0), &mut rng), "0d6 = 0");
        assert_eq!(format_dice(packed(3, 0, 2), &mut rng), "3d0+2 = 2");
    }
}
