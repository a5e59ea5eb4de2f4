//! Denominational fraction vectors and their algebra.
//!
//! Every unspent output's value is partitioned into `PEG_SIZE` buckets. The
//! peg supply index splits the buckets of a vector into a reserve part (low
//! indices) and a liquid part (high indices); all accounting in the peg
//! engine is performed bucket-wise on these vectors.

use std::fmt;
use std::ops::{Add, AddAssign, BitAnd, Index, IndexMut, Neg, Sub, SubAssign};

use bitflags::bitflags;

use crate::peg_level::PegLevel;

mod serialize;

#[cfg(test)]
mod tests;

/// Number of buckets in every fraction vector.
pub const PEG_SIZE: usize = 1200;

/// Denomination ratio between adjacent buckets of the geometric expansion.
pub const PEG_RATE: i64 = 200;

bitflags! {
    /// Freeze marks a fraction vector may carry.
    ///
    /// `NOTARY_F` and `NOTARY_V` imply a set `lock_time`.
    pub struct NotaryMarks: u32 {
        /// Reserve freeze.
        const NOTARY_F = 0x20;
        /// Voluntary freeze of liquid.
        const NOTARY_V = 0x40;
        /// Strict lock of liquid.
        const NOTARY_L = 0x80;
    }
}

/// Storage form of a fraction vector.
///
/// `Value` is shorthand for "expand the scalar in bucket 0 into `Std` by the
/// geometric split"; every algebraic operation promotes to `Std` first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Form {
    Value,
    Std,
}

/// A fixed-length vector of denominational buckets.
pub struct Fractions {
    form: Form,
    pub marks: NotaryMarks,
    pub lock_time: u32,
    f: Box<[i64; PEG_SIZE]>,
}

fn zero_buckets() -> Box<[i64; PEG_SIZE]> {
    Box::new([0i64; PEG_SIZE])
}

/// `value * part / total` with escalation to a 128-bit intermediate when the
/// product overflows. The integer path here is consensus-critical.
fn mul_div(value: i64, part: i64, total: i64) -> i64 {
    match value.checked_mul(part) {
        Some(m) => m / total,
        None => ((value as i128 * part as i128) / total as i128) as i64,
    }
}

/// Proportional part `value * part / total`, zero when either `part` or
/// `total` is zero.
pub fn ratio_of(value: i64, part: i64, total: i64) -> i64 {
    if part == 0 || total == 0 {
        return 0;
    }
    mul_div(value, part, total)
}

impl Fractions {
    /// A vector in VALUE form holding `value` in bucket 0.
    pub fn value(value: i64) -> Self {
        let mut f = zero_buckets();
        f[0] = value;
        Fractions {
            form: Form::Value,
            marks: NotaryMarks::empty(),
            lock_time: 0,
            f,
        }
    }

    /// An all-zero vector in STD form.
    pub fn zero_std() -> Self {
        Fractions {
            form: Form::Std,
            marks: NotaryMarks::empty(),
            lock_time: 0,
            f: zero_buckets(),
        }
    }

    /// `value` expanded into STD form by the geometric split.
    pub fn std_of(value: i64) -> Self {
        let mut fractions = Fractions::value(value);
        fractions.to_std();
        fractions
    }

    pub fn is_value(&self) -> bool {
        self.form == Form::Value
    }

    pub fn is_std(&self) -> bool {
        self.form == Form::Std
    }

    pub fn form(&self) -> Form {
        self.form
    }

    /// Promote to STD form in place. Idempotent on STD.
    ///
    /// Bucket `i` receives `floor(v / PEG_RATE)` of the remaining value, the
    /// last bucket the remainder, so the tail is monotone non-increasing and
    /// bit-identical across implementations.
    pub fn to_std(&mut self) {
        if self.form == Form::Std {
            return;
        }
        let mut v = self.f[0];
        for i in 0..PEG_SIZE {
            if i == PEG_SIZE - 1 {
                self.f[i] = v;
                break;
            }
            let frac = v / PEG_RATE;
            self.f[i] = frac;
            v -= frac;
        }
        self.form = Form::Std;
    }

    /// A copy of this vector in STD form.
    pub fn std(&self) -> Fractions {
        let mut copy = self.clone();
        copy.to_std();
        copy
    }

    /// Algebraic sum of the buckets; for VALUE form, the held scalar.
    pub fn total(&self) -> i64 {
        if self.is_value() {
            return self.f[0];
        }
        self.f.iter().sum()
    }

    /// Sum of buckets below `supply` (the reserve side).
    pub fn low(&self, supply: usize) -> i64 {
        if self.is_value() {
            return self.std().low(supply);
        }
        self.f[..supply.min(PEG_SIZE)].iter().sum()
    }

    /// Sum of buckets at and above `supply` (the liquid side).
    pub fn high(&self, supply: usize) -> i64 {
        if self.is_value() {
            return self.std().high(supply);
        }
        self.f[supply.min(PEG_SIZE)..].iter().sum()
    }

    /// Liquidity delta when the supply index moves from `src` to `dst`.
    pub fn change(&self, src_supply: usize, dst_supply: usize) -> i64 {
        self.high(dst_supply) - self.high(src_supply)
    }

    /// Reserve side relative to a peg level, splitting a partial boundary
    /// bucket proportionally.
    pub fn low_level(&self, level: &PegLevel) -> i64 {
        let supply = level.supply_effective();
        let value = self.low(supply);
        if level.has_partial() && supply < PEG_SIZE {
            let bucket = if self.is_value() {
                self.std().f[supply]
            } else {
                self.f[supply]
            };
            return value + ratio_of(bucket, level.shift_last_part, level.shift_last_total);
        }
        value
    }

    /// Liquid side relative to a peg level; complements [`Self::low_level`].
    pub fn high_level(&self, level: &PegLevel) -> i64 {
        self.total() - self.low_level(level)
    }

    /// All well-formed output vectors are positive.
    pub fn is_positive(&self) -> bool {
        if self.is_value() {
            return true;
        }
        self.f.iter().all(|v| *v >= 0)
    }

    pub fn is_negative(&self) -> bool {
        if self.is_value() {
            return false;
        }
        self.f.iter().all(|v| *v <= 0)
    }

    /// The STD vector keeping only the positive buckets.
    pub fn positive(&self) -> Fractions {
        if self.is_value() {
            return self.std().positive();
        }
        let mut out = Fractions::zero_std();
        for i in 0..PEG_SIZE {
            if self.f[i] > 0 {
                out.f[i] = self.f[i];
            }
        }
        out
    }

    /// The STD vector keeping only the negative buckets.
    pub fn negative(&self) -> Fractions {
        if self.is_value() {
            return self.std().negative();
        }
        let mut out = Fractions::zero_std();
        for i in 0..PEG_SIZE {
            if self.f[i] < 0 {
                out.f[i] = self.f[i];
            }
        }
        out
    }

    /// The STD vector zeroing buckets at and above `supply`.
    pub fn low_part(&self, supply: usize) -> Fractions {
        if self.is_value() {
            return self.std().low_part(supply);
        }
        let mut out = Fractions::zero_std();
        let end = supply.min(PEG_SIZE);
        out.f[..end].copy_from_slice(&self.f[..end]);
        out
    }

    /// The STD vector zeroing buckets below `supply`.
    pub fn high_part(&self, supply: usize) -> Fractions {
        if self.is_value() {
            return self.std().high_part(supply);
        }
        let mut out = Fractions::zero_std();
        let start = supply.min(PEG_SIZE);
        out.f[start..].copy_from_slice(&self.f[start..]);
        out
    }

    /// The reserve-side part relative to a peg level; a partial boundary
    /// bucket contributes its proportional reserve slice.
    pub fn low_part_level(&self, level: &PegLevel) -> Fractions {
        if self.is_value() {
            return self.std().low_part_level(level);
        }
        let supply = level.supply_effective();
        let mut out = self.low_part(supply);
        if level.has_partial() && supply < PEG_SIZE {
            out.f[supply] = ratio_of(self.f[supply], level.shift_last_part, level.shift_last_total);
        }
        out
    }

    /// The liquid-side part relative to a peg level; complements
    /// [`Self::low_part_level`].
    pub fn high_part_level(&self, level: &PegLevel) -> Fractions {
        if self.is_value() {
            return self.std().high_part_level(level);
        }
        let supply = level.supply_effective();
        let mut out = self.high_part(supply);
        if level.has_partial() && supply < PEG_SIZE {
            out.f[supply] = self.f[supply]
                - ratio_of(self.f[supply], level.shift_last_part, level.shift_last_total);
        }
        out
    }

    /// A new STD vector with total exactly `part`, each bucket approximating
    /// `f[i] * part / total`.
    ///
    /// After truncation, the shortfall is distributed by incrementing buckets
    /// in ascending index order starting at the first non-zero source bucket,
    /// cycling until exhausted; a bucket never exceeds its source. The empty
    /// vector when `part` or the total is zero; a full STD copy when
    /// `part > total`.
    pub fn ratio_part(&self, part: i64) -> Fractions {
        if self.is_value() {
            return self.std().ratio_part(part);
        }
        let total = self.total();
        let mut out = Fractions::zero_std();
        if part == 0 || total == 0 {
            return out;
        }
        if part > total {
            return self.std();
        }

        let mut part_sum = 0i64;
        let mut adjust_from = PEG_SIZE;
        for i in 0..PEG_SIZE {
            let v = self.f[i];
            if v != 0 && i < adjust_from {
                adjust_from = i;
            }
            let taken = mul_div(v, part, total);
            out.f[i] = taken;
            part_sum += taken;
        }

        if part_sum >= part {
            return out;
        }

        let mut idx = adjust_from;
        let mut shortfall = part - part_sum;
        let mut stalled = 0usize;
        while shortfall > 0 {
            if out.f[idx] < self.f[idx] {
                shortfall -= 1;
                out.f[idx] += 1;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled > PEG_SIZE {
                    break;
                }
            }
            idx += 1;
            if idx >= PEG_SIZE {
                idx = adjust_from;
            }
        }
        out
    }

    /// Destructively move up to `value_to_move` into `dst`, proportionally
    /// across buckets. Returns the uncompleted amount: when the total here is
    /// below `value_to_move` the whole vector is moved and the difference is
    /// returned.
    pub fn move_ratio_part_to(&mut self, value_to_move: i64, dst: &mut Fractions) -> i64 {
        let total = self.total();
        if total == 0 {
            return value_to_move;
        }
        if value_to_move == 0 {
            return 0;
        }

        self.to_std();
        dst.to_std();

        let mut part = value_to_move;
        if part >= total {
            part = total;
            for i in 0..PEG_SIZE {
                dst.f[i] += self.f[i];
                self.f[i] = 0;
            }
            return value_to_move - part;
        }

        let mut part_sum = 0i64;
        let mut adjust_from = PEG_SIZE;
        for i in 0..PEG_SIZE {
            let v = self.f[i];
            if v != 0 && i < adjust_from {
                adjust_from = i;
            }
            let taken = mul_div(v, part, total);
            part_sum += taken;
            dst.f[i] += taken;
            self.f[i] -= taken;
        }

        if part_sum >= part {
            return 0;
        }

        let mut idx = adjust_from;
        let mut shortfall = part - part_sum;
        let mut stalled = 0usize;
        while shortfall > 0 {
            if self.f[idx] > 0 {
                shortfall -= 1;
                dst.f[idx] += 1;
                self.f[idx] -= 1;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled > PEG_SIZE {
                    break;
                }
            }
            idx += 1;
            if idx >= PEG_SIZE {
                idx = adjust_from;
            }
        }
        0
    }

    /// A scaled symmetric measure of how far two vectors' shapes differ, used
    /// to rank coins for withdrawal. Zero for identical shapes, one for
    /// equal-total vectors with disjoint support. When the totals differ the
    /// larger vector is scaled down with [`Self::ratio_part`] first.
    pub fn distortion(&self, other: &Fractions) -> f64 {
        if self.is_value() {
            return self.std().distortion(other);
        }
        if other.is_value() {
            return self.distortion(&other.std());
        }

        let total_a = self.total();
        let total_b = other.total();

        if total_a == total_b {
            if total_a == 0 {
                return 0.0;
            }
            let mut diff = 0i64;
            for i in 0..PEG_SIZE {
                let va = self.f[i];
                let vb = other.f[i];
                if va > vb {
                    diff += va - vb;
                }
            }
            return diff as f64 / total_a as f64;
        }

        if total_a < total_b {
            if total_a == 0 {
                return total_b as f64;
            }
            let scaled = other.ratio_part(total_a);
            return self.distortion(&scaled);
        }

        if total_b == 0 {
            return total_a as f64;
        }
        let scaled = self.ratio_part(total_b);
        scaled.distortion(other)
    }
}

impl Clone for Fractions {
    fn clone(&self) -> Self {
        Fractions {
            form: self.form,
            marks: self.marks,
            lock_time: self.lock_time,
            f: self.f.clone(),
        }
    }
}

impl Default for Fractions {
    fn default() -> Self {
        Fractions::value(0)
    }
}

/// Equality in the STD sense: VALUE vectors compare equal to their
/// expansion. Marks and lock time take part.
impl PartialEq for Fractions {
    fn eq(&self, other: &Self) -> bool {
        if self.marks != other.marks || self.lock_time != other.lock_time {
            return false;
        }
        let a = self.std();
        let b = other.std();
        a.f[..] == b.f[..]
    }
}

impl Eq for Fractions {}

impl fmt::Debug for Fractions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fractions")
            .field("form", &self.form)
            .field("marks", &self.marks)
            .field("lock_time", &self.lock_time)
            .field("total", &self.total())
            .finish()
    }
}

/// Direct bucket access; only meaningful on STD vectors.
impl Index<usize> for Fractions {
    type Output = i64;

    fn index(&self, index: usize) -> &i64 {
        debug_assert!(self.is_std());
        &self.f[index]
    }
}

impl IndexMut<usize> for Fractions {
    fn index_mut(&mut self, index: usize) -> &mut i64 {
        debug_assert!(self.is_std());
        &mut self.f[index]
    }
}

impl AddAssign<&Fractions> for Fractions {
    fn add_assign(&mut self, other: &Fractions) {
        if other.is_value() {
            *self += &other.std();
            return;
        }
        self.to_std();
        for i in 0..PEG_SIZE {
            self.f[i] += other.f[i];
        }
    }
}

impl SubAssign<&Fractions> for Fractions {
    fn sub_assign(&mut self, other: &Fractions) {
        if other.is_value() {
            *self -= &other.std();
            return;
        }
        self.to_std();
        for i in 0..PEG_SIZE {
            self.f[i] -= other.f[i];
        }
    }
}

impl Add for &Fractions {
    type Output = Fractions;

    fn add(self, other: &Fractions) -> Fractions {
        let mut out = self.std();
        out += other;
        out
    }
}

impl Sub for &Fractions {
    type Output = Fractions;

    fn sub(self, other: &Fractions) -> Fractions {
        let mut out = self.std();
        out -= other;
        out
    }
}

impl Neg for &Fractions {
    type Output = Fractions;

    fn neg(self) -> Fractions {
        let mut out = self.std();
        for i in 0..PEG_SIZE {
            out.f[i] = -out.f[i];
        }
        out
    }
}

/// Bucket-wise conservative intersection: same-sign minimum of magnitudes,
/// zero on sign mismatch.
impl BitAnd for &Fractions {
    type Output = Fractions;

    fn bitand(self, other: &Fractions) -> Fractions {
        let a = self.std();
        let b = other.std();
        let mut out = a.clone();
        for i in 0..PEG_SIZE {
            let va = a.f[i];
            let vb = b.f[i];
            out.f[i] = if va >= 0 && vb >= 0 {
                va.min(vb)
            } else if va < 0 && vb < 0 {
                va.max(vb)
            } else {
                0
            };
        }
        out
    }
}
