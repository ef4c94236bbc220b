use crate::error::Error;
use crate::interrupt;
use crate::io::Output;
use crate::limits;

/// Digit length at or above which multiplication switches from the
/// schoolbook loop to Karatsuba splitting.
pub const KARATSUBA_LEN: usize = 64;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// An arbitrary-precision signed decimal. `digits` holds one decimal digit
/// per byte, least significant first; `rdx` counts how many of them sit to
/// the right of the decimal point. An empty digit vector is canonical zero
/// (its sign is always false, though `rdx` may carry a scale).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Number {
    digits: Vec<u8>,
    rdx: usize,
    neg: bool,
}

fn poll() -> Result<(), Error> {
    if interrupt::pending() {
        Err(Error::Signal)
    } else {
        Ok(())
    }
}

/// Fixed-length magnitude compare, most significant digit first. Returns
/// `±(i + 1)` where `i` is the index of the first differing digit, or 0.
fn cmp_digits(a: &[u8], b: &[u8], len: usize) -> isize {
    for i in (0..len).rev() {
        let c = a[i] as isize - b[i] as isize;
        if c != 0 {
            let pos = (i + 1) as isize;
            return if c < 0 { -pos } else { pos };
        }
    }
    0
}

/// In-place `a -= b`, propagating borrows into `a`'s higher digits. `a`
/// must be at least as long as `b` and hold the larger magnitude.
fn sub_arrays(a: &mut [u8], b: &[u8]) -> Result<(), Error> {
    for i in 0..b.len() {
        poll()?;
        let mut j = i;
        let mut borrow = b[i];
        while borrow > 0 {
            if a[j] >= borrow {
                a[j] -= borrow;
                borrow = 0;
            } else {
                a[j] = a[j] + 10 - borrow;
                borrow = 1;
                j += 1;
            }
        }
    }
    Ok(())
}

impl Number {
    pub fn zero() -> Self {
        Number::default()
    }

    pub fn zero_scaled(scale: usize) -> Self {
        Number {
            digits: Vec::new(),
            rdx: scale,
            neg: false,
        }
    }

    pub fn one() -> Self {
        Number {
            digits: vec![1],
            rdx: 0,
            neg: false,
        }
    }

    pub fn from_u64(mut val: u64) -> Self {
        let mut digits = Vec::new();
        while val != 0 {
            digits.push((val % 10) as u8);
            val /= 10;
        }
        Number {
            digits,
            rdx: 0,
            neg: false,
        }
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    /// True for exactly the integer 1 regardless of sign, as the special
    /// cases in multiply and power want it.
    fn is_one_mag(&self) -> bool {
        self.digits.len() == 1 && self.rdx == 0 && self.digits[0] == 1
    }

    pub fn is_neg(&self) -> bool {
        self.neg
    }

    /// Count of fractional digits.
    pub fn scale(&self) -> usize {
        self.rdx
    }

    /// Count of integer digits.
    pub fn int_len(&self) -> usize {
        self.digits.len().saturating_sub(self.rdx)
    }

    pub fn negate(&mut self) {
        if !self.digits.is_empty() {
            self.neg = !self.neg;
        }
    }

    /// Trim high-order zero digits, canonicalize zero, and never trim below
    /// the radix point.
    fn clean(&mut self) {
        while self.digits.last() == Some(&0) {
            self.digits.pop();
        }
        if self.digits.is_empty() {
            self.neg = false;
        } else if self.digits.len() < self.rdx {
            self.digits.resize(self.rdx, 0);
        }
    }

    /// Drop `places` least-significant (fractional) digits.
    fn truncate(&mut self, places: usize) {
        debug_assert!(places <= self.rdx);
        if places == 0 {
            return;
        }
        self.rdx -= places;
        if !self.digits.is_empty() {
            self.digits.drain(..places.min(self.digits.len()));
        }
    }

    /// Add `places` fractional zero digits below the existing ones. Value
    /// is unchanged; scale grows.
    fn extend(&mut self, places: usize) {
        if places == 0 {
            return;
        }
        let mut v = vec![0u8; places];
        v.extend_from_slice(&self.digits);
        self.digits = v;
        self.rdx += places;
    }

    /// Multiply by `10^places` by moving the radix point, extending with
    /// zeros when the point runs out.
    fn shift(&mut self, places: usize) -> Result<(), Error> {
        if places == 0 || self.digits.is_empty() {
            return Ok(());
        }
        if places + self.digits.len() > limits::NUM_MAX as usize {
            return Err(Error::NumLen);
        }
        if self.rdx >= places {
            self.rdx -= places;
        } else {
            let ext = places - self.rdx;
            self.extend(ext);
            self.rdx = 0;
        }
        self.clean();
        Ok(())
    }

    /// Split an integer at digit `idx` into (low, high) halves.
    fn split(&self, idx: usize) -> (Number, Number) {
        let (mut lo, mut hi) = if idx < self.digits.len() {
            (
                Number {
                    digits: self.digits[..idx].to_vec(),
                    rdx: 0,
                    neg: false,
                },
                Number {
                    digits: self.digits[idx..].to_vec(),
                    rdx: 0,
                    neg: false,
                },
            )
        } else {
            (
                Number {
                    digits: self.digits.clone(),
                    rdx: 0,
                    neg: false,
                },
                Number::zero(),
            )
        };
        lo.clean();
        hi.clean();
        (lo, hi)
    }

    /// Magnitude comparison, sign ignored. The magnitude of the return
    /// value is the digit position of the first disagreement, which the
    /// square-root convergence test uses.
    fn cmp_mag(&self, b: &Number) -> Result<isize, Error> {
        poll()?;
        if self.digits.is_empty() {
            return Ok(-((!b.digits.is_empty()) as isize));
        }
        if b.digits.is_empty() {
            return Ok(1);
        }
        let a_int = self.int_len();
        let b_int = b.int_len();
        if a_int != b_int {
            return Ok(a_int as isize - b_int as isize);
        }
        let a_max = self.rdx > b.rdx;
        let (min, diff, max_num, min_num) = if a_max {
            (b.rdx, self.rdx - b.rdx, &self.digits[..], &b.digits[..])
        } else {
            (self.rdx, b.rdx - self.rdx, &b.digits[..], &self.digits[..])
        };
        let cmp = cmp_digits(&max_num[diff..], min_num, b_int + min);
        if cmp != 0 {
            return Ok(if a_max { cmp } else { -cmp });
        }
        // Same aligned digits; the one with extra low digits wins if any
        // of them is nonzero.
        for i in (0..diff).rev() {
            poll()?;
            if max_num[i] != 0 {
                return Ok(if a_max { 1 } else { -1 });
            }
        }
        Ok(0)
    }

    /// Total-order comparison: negative, zero, or positive result like a
    /// three-way compare.
    pub fn cmp(&self, b: &Number) -> Result<isize, Error> {
        if self.digits.is_empty() {
            if b.digits.is_empty() {
                return Ok(0);
            }
            return Ok(if b.neg { 1 } else { -1 });
        }
        if b.digits.is_empty() {
            return Ok(if self.neg { -1 } else { 1 });
        }
        if self.neg != b.neg {
            return Ok(if self.neg { -1 } else { 1 });
        }
        let m = self.cmp_mag(b)?;
        Ok(if self.neg { -m } else { m })
    }

    /// Magnitude addition for equal signs. Result carries `a`'s sign.
    fn mag_add(a: &Number, b: &Number) -> Result<Number, Error> {
        if a.digits.is_empty() {
            return Ok(b.clone());
        }
        if b.digits.is_empty() {
            return Ok(a.clone());
        }
        let (diff, big, small) = if a.rdx > b.rdx {
            (a.rdx - b.rdx, a, b)
        } else {
            (b.rdx - a.rdx, b, a)
        };
        let mut c = Number {
            digits: Vec::with_capacity(a.digits.len().max(b.digits.len()) + 1),
            rdx: a.rdx.max(b.rdx),
            neg: a.neg,
        };
        c.digits.extend_from_slice(&big.digits[..diff]);
        let x = &big.digits[diff..];
        let y = &small.digits[..];
        let min_len = x.len().min(y.len());
        let mut carry = 0u8;
        for i in 0..min_len {
            poll()?;
            let s = x[i] + y[i] + carry;
            carry = s / 10;
            c.digits.push(s % 10);
        }
        let rest = if x.len() > y.len() {
            &x[min_len..]
        } else {
            &y[min_len..]
        };
        for &d in rest {
            poll()?;
            let s = d + carry;
            carry = s / 10;
            c.digits.push(s % 10);
        }
        if carry != 0 {
            c.digits.push(carry);
        }
        Ok(c)
    }

    /// Magnitude subtraction for differing signs. Result carries the sign
    /// of the larger magnitude.
    fn mag_sub(a: &Number, b: &Number) -> Result<Number, Error> {
        if a.digits.is_empty() {
            return Ok(b.clone());
        }
        if b.digits.is_empty() {
            return Ok(a.clone());
        }
        let cmp = a.cmp_mag(b)?;
        if cmp == 0 {
            return Ok(Number::zero_scaled(a.rdx.max(b.rdx)));
        }
        let (minuend, subtrahend, neg) = if cmp > 0 {
            (a, b, a.neg)
        } else {
            (b, a, b.neg)
        };
        let mut c = minuend.clone();
        c.neg = neg;
        let start = if c.rdx < subtrahend.rdx {
            c.extend(subtrahend.rdx - c.rdx);
            0
        } else {
            c.rdx - subtrahend.rdx
        };
        sub_arrays(&mut c.digits[start..], &subtrahend.digits)?;
        c.clean();
        Ok(c)
    }

    /// Addition dispatches on the signs: equal signs add magnitudes,
    /// differing signs subtract them. `scale` is unused (sums keep every
    /// fractional digit) but kept so all binary operations share a shape.
    pub fn add(&self, b: &Number, _scale: usize) -> Result<Number, Error> {
        let mut c = if self.neg == b.neg {
            Number::mag_add(self, b)?
        } else {
            Number::mag_sub(self, b)?
        };
        c.clean();
        Ok(c)
    }

    /// Subtraction flips `b`'s sign and re-dispatches through addition.
    pub fn sub(&self, b: &Number, scale: usize) -> Result<Number, Error> {
        let mut flipped = b.clone();
        flipped.negate();
        self.add(&flipped, scale)
    }

    /// Fix a multiplicative result to `scale` fractional digits and give it
    /// the XOR of the operand signs.
    fn retire(&mut self, scale: usize, neg1: bool, neg2: bool) {
        if self.rdx < scale {
            self.extend(scale - self.rdx);
        } else {
            self.truncate(self.rdx - scale);
        }
        self.clean();
        if !self.digits.is_empty() {
            self.neg = neg1 != neg2;
        }
    }

    /// Integer magnitude product, schoolbook below the Karatsuba cutoff.
    fn karatsuba(a: &Number, b: &Number) -> Result<Number, Error> {
        poll()?;
        if a.digits.is_empty() || b.digits.is_empty() {
            return Ok(Number::zero());
        }
        if a.is_one_mag() {
            return Ok(b.clone());
        }
        if b.is_one_mag() {
            return Ok(a.clone());
        }

        let alen = a.digits.len();
        let blen = b.digits.len();
        if alen + blen < KARATSUBA_LEN || alen < KARATSUBA_LEN || blen < KARATSUBA_LEN {
            let mut digits = vec![0u8; alen + blen];
            for i in 0..blen {
                poll()?;
                let mut carry = 0u32;
                for j in 0..alen {
                    let val = digits[i + j] as u32 + a.digits[j] as u32 * b.digits[i] as u32 + carry;
                    carry = val / 10;
                    digits[i + j] = (val % 10) as u8;
                }
                digits[i + alen] += carry as u8;
            }
            let mut c = Number {
                digits,
                rdx: 0,
                neg: false,
            };
            c.clean();
            return Ok(c);
        }

        let max2 = (alen.max(blen) + 1) / 2;
        let (l1, h1) = a.split(max2);
        let (l2, h2) = b.split(max2);
        let m1 = h1.add(&l1, 0)?;
        let m2 = h2.add(&l2, 0)?;

        let mut z0 = Number::karatsuba(&h1, &h2)?;
        let mut z1 = Number::karatsuba(&m1, &m2)?;
        let z2 = Number::karatsuba(&l1, &l2)?;

        z1 = z1.sub(&z0, 0)?.sub(&z2, 0)?;
        z0.shift(max2 * 2)?;
        z1.shift(max2)?;
        z0.add(&z1, 0)?.add(&z2, 0)
    }

    /// Multiplication. The result keeps
    /// `min(rdx_a + rdx_b, max(scale, rdx_a, rdx_b))` fractional digits.
    pub fn mul(&self, b: &Number, scale: usize) -> Result<Number, Error> {
        let scale = scale.max(self.rdx).max(b.rdx).min(self.rdx + b.rdx);
        let mut maxrdx = self.rdx.max(b.rdx).max(scale);

        let mut cpa = self.clone();
        let mut cpb = b.clone();
        cpa.neg = false;
        cpb.neg = false;
        cpa.shift(maxrdx)?;
        cpb.shift(maxrdx)?;

        let mut c = Number::karatsuba(&cpa, &cpb)?;

        maxrdx += scale;
        if c.digits.len() < maxrdx {
            c.digits.resize(maxrdx, 0);
        }
        c.rdx = maxrdx;
        c.retire(scale, self.neg, b.neg);
        Ok(c)
    }

    /// Long division by trial subtraction, `scale` fractional digits in the
    /// quotient.
    pub fn div(&self, b: &Number, scale: usize) -> Result<Number, Error> {
        if b.digits.is_empty() {
            return Err(Error::DivideByZero);
        }
        if self.digits.is_empty() {
            return Ok(Number::zero_scaled(scale));
        }
        if b.is_one_mag() {
            let mut c = self.clone();
            c.retire(scale, self.neg, b.neg);
            return Ok(c);
        }

        let mut cp = self.clone();
        cp.neg = false;
        let mut len = b.digits.len();
        if len > cp.digits.len() {
            cp.extend(len - cp.digits.len());
        }
        if b.rdx > cp.rdx {
            cp.extend(b.rdx - cp.rdx);
        }
        cp.rdx -= b.rdx;
        if scale > cp.rdx {
            cp.extend(scale - cp.rdx);
        }

        if b.rdx == b.digits.len() {
            // Pure fraction: its high-order zeros never affect a window.
            let zeros = b.digits.iter().rev().take_while(|&&d| d == 0).count();
            len -= zeros;
        }

        // An extra zero in front keeps every window the same width.
        cp.digits.push(0);
        let end = cp.digits.len() - len;

        let mut qdigits = vec![0u8; cp.digits.len()];
        let p = &b.digits[..len];

        for i in (0..end).rev() {
            poll()?;
            let window = &mut cp.digits[i..i + len + 1];
            let mut q = 0u8;
            while window[len] != 0 || cmp_digits(&window[..len], p, len) >= 0 {
                sub_arrays(window, p)?;
                q += 1;
            }
            qdigits[i] = q;
        }

        let mut c = Number {
            rdx: cp.rdx,
            digits: qdigits,
            neg: false,
        };
        c.retire(scale, self.neg, b.neg);
        Ok(c)
    }

    /// Quotient and remainder in one pass: `d = a − (a/b)·b` computed at
    /// `ts = max(scale + rdx_b, rdx_a)`. The remainder keeps the sign of
    /// the dividend.
    pub fn divmod(&self, b: &Number, scale: usize) -> Result<(Number, Number), Error> {
        if b.digits.is_empty() {
            return Err(Error::DivideByZero);
        }
        let ts = (scale + b.rdx).max(self.rdx);
        if self.digits.is_empty() {
            return Ok((Number::zero_scaled(scale), Number::zero_scaled(ts)));
        }

        let c = self.div(b, scale)?;
        let mul_scale = if scale != 0 { ts } else { 0 };
        let temp = c.mul(b, mul_scale)?;
        let mut d = self.sub(&temp, 0)?;

        if ts > d.rdx && !d.digits.is_empty() {
            d.extend(ts - d.rdx);
        }
        let neg = d.neg;
        d.retire(ts, self.neg, b.neg);
        d.neg = neg;
        if d.digits.is_empty() {
            d.neg = false;
        }
        Ok((c, d))
    }

    /// Remainder only.
    pub fn rem(&self, b: &Number, scale: usize) -> Result<Number, Error> {
        Ok(self.divmod(b, scale)?.1)
    }

    /// Reciprocal at `scale`.
    fn inv(&self, scale: usize) -> Result<Number, Error> {
        Number::one().div(self, scale)
    }

    /// Power with an integer exponent, square-and-multiply. Negative
    /// exponents invert the base; positive ones cap the scale at
    /// `min(rdx_a · e, max(scale, rdx_a))`.
    pub fn pow(&self, b: &Number, scale: usize) -> Result<Number, Error> {
        if b.rdx != 0 {
            return Err(Error::NonInteger);
        }
        if b.digits.is_empty() {
            return Ok(Number::one());
        }
        if self.digits.is_empty() {
            return Ok(Number::zero_scaled(scale));
        }
        if b.is_one_mag() {
            return if !b.neg {
                Ok(self.clone())
            } else {
                self.inv(scale)
            };
        }

        let neg = b.neg;
        let mut mag = b.clone();
        mag.neg = false;
        let mut pow = mag.to_u64()?;

        let scale = if neg {
            scale
        } else {
            self.rdx.saturating_mul(pow as usize).min(scale.max(self.rdx))
        };

        let mut copy = self.clone();
        let mut powrdx = self.rdx;
        while pow & 1 == 0 {
            poll()?;
            powrdx <<= 1;
            copy = copy.mul(&copy, powrdx)?;
            pow >>= 1;
        }

        let mut c = copy.clone();
        let mut resrdx = powrdx;
        pow >>= 1;

        while pow != 0 {
            poll()?;
            powrdx <<= 1;
            copy = copy.mul(&copy, powrdx)?;
            if pow & 1 == 1 {
                resrdx += powrdx;
                c = c.mul(&copy, resrdx)?;
            }
            pow >>= 1;
        }

        if neg {
            c = c.inv(scale)?;
        }
        if c.rdx > scale {
            c.truncate(c.rdx - scale);
        }
        if c.digits.iter().all(|&d| d == 0) {
            c = Number::zero_scaled(scale);
        }
        Ok(c)
    }

    /// Newton's method square root, truncated to `scale` fractional
    /// digits.
    pub fn sqrt(&self, scale: usize) -> Result<Number, Error> {
        if self.digits.is_empty() {
            return Ok(Number::zero_scaled(scale));
        }
        if self.neg {
            return Err(Error::Negative);
        }
        if self.is_one_mag() {
            let mut b = Number::one();
            b.extend(scale);
            return Ok(b);
        }

        let mut scale = scale.max(self.rdx) + 1;

        let half = Number {
            digits: vec![5],
            rdx: 1,
            neg: false,
        };

        // Initial guess: 2 or 6 scaled into the middle of the integer part,
        // depending on digit-count parity.
        let mut x0 = Number::one();
        let mut pow = self.int_len();
        if pow > 0 {
            x0.digits[0] = if pow & 1 == 1 { 2 } else { 6 };
            pow -= 2 - (pow & 1);
            x0.extend(pow);
            x0.rdx = 0;
        }

        let mut resrdx = scale + 2;
        let target = x0.int_len() + resrdx - 1;

        let mut cmp: isize = 1;
        let mut cmp1 = isize::MAX;
        let mut cmp2 = isize::MAX;
        let mut digs = 0usize;
        let mut digs1 = 0usize;
        let mut times = 0u32;

        while cmp != 0 || digs < target {
            poll()?;
            let f = self.div(&x0, resrdx)?;
            let fprime = x0.add(&f, resrdx)?;
            let x1 = fprime.mul(&half, resrdx)?;

            cmp = x1.cmp(&x0)?;
            digs = x1.digits.len().saturating_sub(cmp.unsigned_abs());

            if cmp == cmp2 && digs == digs1 {
                times += 1;
            } else {
                times = 0;
            }
            // A repeating oscillation pattern means the precision is too
            // low to converge; widen it.
            if times > 4 {
                resrdx += 1;
            }

            cmp2 = cmp1;
            cmp1 = cmp;
            digs1 = digs;
            x0 = x1;
        }

        scale -= 1;
        if x0.rdx > scale {
            x0.truncate(x0.rdx - scale);
        }
        x0.clean();
        Ok(x0)
    }

    /// `a^b mod c` over integers, used by dc's `|`.
    pub fn modexp(&self, b: &Number, c: &Number) -> Result<Number, Error> {
        if c.digits.is_empty() {
            return Err(Error::DivideByZero);
        }
        if self.rdx != 0 || b.rdx != 0 || c.rdx != 0 {
            return Err(Error::NonInteger);
        }
        if b.neg {
            return Err(Error::Negative);
        }

        let two = Number::from_u64(2);
        let mut base = self.rem(c, 0)?;
        let mut exp = b.clone();
        let mut d = Number::one();

        while !exp.digits.is_empty() {
            poll()?;
            let (q, r) = exp.divmod(&two, 0)?;
            exp = q;
            if r.is_one_mag() {
                d = d.mul(&base, 0)?.rem(c, 0)?;
            }
            base = base.mul(&base, 0)?.rem(c, 0)?;
        }
        Ok(d)
    }

    /// Integer part as a `u64`; fails on negatives and overflow.
    pub fn to_u64(&self) -> Result<u64, Error> {
        if self.neg {
            return Err(Error::Negative);
        }
        let mut result: u64 = 0;
        let mut pow: u64 = 1;
        for i in self.rdx..self.digits.len() {
            result = result
                .checked_add((self.digits[i] as u64).checked_mul(pow).ok_or(Error::Overflow)?)
                .ok_or(Error::Overflow)?;
            if i + 1 < self.digits.len() {
                pow = pow.checked_mul(10).ok_or(Error::Overflow)?;
            }
        }
        Ok(result)
    }

    fn str_valid(val: &str, base: u64) -> bool {
        let small = base <= 10;
        let lim = if small {
            base as u8 + b'0'
        } else {
            base as u8 - 10 + b'A'
        };
        let mut radix = false;
        for &c in val.as_bytes() {
            if c == b'.' {
                if radix {
                    return false;
                }
                radix = true;
                continue;
            }
            if c < b'0' || (small && c >= lim) || (c > b'9' && (c < b'A' || c >= lim)) {
                return false;
            }
        }
        true
    }

    fn parse_decimal(val: &str) -> Number {
        let val = val.trim_start_matches('0');
        let rdx = val
            .find('.')
            .map(|p| val.len() - p - 1)
            .unwrap_or(0);
        if val.bytes().all(|c| c == b'0' || c == b'.') {
            let mut n = Number::zero();
            n.rdx = rdx;
            return n;
        }
        let mut digits = Vec::with_capacity(val.len());
        for c in val.bytes().rev() {
            if c != b'.' {
                digits.push(c - b'0');
            }
        }
        Number {
            digits,
            rdx,
            neg: false,
        }
    }

    fn parse_base(val: &str, base: u64) -> Result<Number, Error> {
        if val.bytes().all(|c| c == b'0' || c == b'.') {
            return Ok(Number::zero());
        }
        let base_n = Number::from_u64(base);
        let digit = |c: u8| -> u64 {
            if c <= b'9' {
                (c - b'0') as u64
            } else {
                (c - b'A') as u64 + 10
            }
        };

        let bytes = val.as_bytes();
        let mut n = Number::zero();
        let mut i = 0;
        while i < bytes.len() && bytes[i] != b'.' {
            n = n.mul(&base_n, 0)?;
            n = n.add(&Number::from_u64(digit(bytes[i])), 0)?;
            i += 1;
        }
        if i == bytes.len() {
            return Ok(n);
        }

        i += 1;
        let mut result = Number::zero();
        let mut mult = Number::one();
        let mut count = 0usize;
        while i < bytes.len() {
            result = result.mul(&base_n, 0)?;
            result = result.add(&Number::from_u64(digit(bytes[i])), 0)?;
            mult = mult.mul(&base_n, 0)?;
            count += 1;
            i += 1;
        }

        result = result.div(&mult, count)?;
        n = n.add(&result, 0)?;
        if !n.digits.is_empty() {
            if n.rdx < count {
                n.extend(count - n.rdx);
            }
        } else {
            n = Number::zero();
        }
        Ok(n)
    }

    /// Parse a literal in `base`. Base 10 scans digits directly; other
    /// bases fold digit by digit with bignum arithmetic.
    pub fn parse(val: &str, base: u64) -> Result<Number, Error> {
        debug_assert!((2..=16).contains(&base));
        if !Number::str_valid(val, base) {
            return Err(Error::BadNumString);
        }
        if base == 10 {
            Ok(Number::parse_decimal(val))
        } else {
            Number::parse_base(val, base)
        }
    }

    fn print_hex_digit(
        dig: u64,
        radix: bool,
        out: &mut Output,
    ) -> Result<(), Error> {
        if radix {
            out.wrap()?;
            out.putchar(b'.')?;
        }
        out.wrap()?;
        out.putchar(HEX_DIGITS[dig as usize])?;
        Ok(())
    }

    fn print_digit_block(
        dig: u64,
        width: usize,
        radix: bool,
        out: &mut Output,
    ) -> Result<(), Error> {
        out.wrap()?;
        out.putchar(if radix { b'.' } else { b' ' })?;

        let mut pow = 10u64.pow(width as u32 - 1);
        let mut num = dig;
        for _ in 0..width {
            out.wrap()?;
            out.putchar((num / pow) as u8 + b'0')?;
            num %= pow;
            pow /= 10;
        }
        Ok(())
    }

    fn print_digit(
        dig: u64,
        width: usize,
        radix: bool,
        stream: bool,
        out: &mut Output,
    ) -> Result<(), Error> {
        if stream {
            out.putchar(dig as u8)?;
            Ok(())
        } else if width == 1 {
            Number::print_hex_digit(dig, radix, out)
        } else {
            Number::print_digit_block(dig, width, radix, out)
        }
    }

    fn print_decimal(&self, out: &mut Output) -> Result<(), Error> {
        if self.neg {
            out.putchar(b'-')?;
        }
        for i in (0..self.digits.len()).rev() {
            Number::print_hex_digit(self.digits[i] as u64, i + 1 == self.rdx, out)?;
        }
        Ok(())
    }

    /// Emit the magnitude in an arbitrary base: integer part by repeated
    /// divmod, fraction by repeated multiply, exactly `rdx` fractional
    /// digits.
    fn print_num(
        &self,
        base_t: u64,
        width: usize,
        stream: bool,
        out: &mut Output,
    ) -> Result<(), Error> {
        if self.digits.is_empty() {
            return Number::print_digit(0, width, false, stream, out);
        }

        let base = Number::from_u64(base_t);
        let mut intp = self.clone();
        intp.neg = false;
        intp.truncate(intp.rdx);
        let mut mag = self.clone();
        mag.neg = false;
        let mut fracp = mag.sub(&intp, 0)?;

        let mut stack = Vec::new();
        while !intp.digits.is_empty() {
            poll()?;
            let (q, d) = intp.divmod(&base, 0)?;
            intp = q;
            stack.push(d.to_u64()?);
        }
        for &dig in stack.iter().rev() {
            Number::print_digit(dig, width, false, stream, out)?;
        }

        if self.rdx == 0 {
            return Ok(());
        }

        let mut frac_len = Number::one();
        let mut radix = true;
        while frac_len.digits.len() <= self.rdx {
            poll()?;
            fracp = fracp.mul(&base, self.rdx)?;
            let dig = fracp.to_u64()?;
            fracp = fracp.sub(&Number::from_u64(dig), 0)?;
            Number::print_digit(dig, width, radix, stream, out)?;
            frac_len = frac_len.mul(&base, 0)?;
            radix = false;
        }
        Ok(())
    }

    fn print_base(&self, base_t: u64, out: &mut Output) -> Result<(), Error> {
        if self.neg {
            out.putchar(b'-')?;
        }
        let width = if base_t <= 16 {
            1
        } else {
            let mut i = base_t - 1;
            let mut width = 0;
            while i != 0 {
                i /= 10;
                width += 1;
            }
            width
        };
        self.print_num(base_t, width, false, out)
    }

    /// Print in `base_t`, optionally newline-terminated, wrapping long
    /// output.
    pub fn print(&self, base_t: u64, newline: bool, out: &mut Output) -> Result<(), Error> {
        out.wrap()?;
        if self.digits.is_empty() {
            out.putchar(b'0')?;
        } else if base_t == 10 {
            self.print_decimal(out)?;
        } else {
            self.print_base(base_t, out)?;
        }
        if newline {
            out.putchar(b'\n')?;
        }
        Ok(())
    }

    /// dc's `P` for numbers: emit base-256 digits as raw bytes.
    pub fn stream(&self, out: &mut Output) -> Result<(), Error> {
        self.print_num(256, 1, true, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Capture;

    fn n(s: &str) -> Number {
        if let Some(stripped) = s.strip_prefix('-') {
            let mut v = Number::parse(stripped, 10).unwrap();
            v.negate();
            v
        } else {
            Number::parse(s, 10).unwrap()
        }
    }

    fn render(num: &Number, base: u64) -> String {
        let cap = Capture::new();
        let mut out = Output::new(Box::new(cap.clone()));
        num.print(base, false, &mut out).unwrap();
        out.flush().unwrap();
        cap.contents()
    }

    fn s(num: &Number) -> String {
        render(num, 10)
    }

    #[test]
    fn test_parse_and_print() {
        assert_eq!(s(&n("0")), "0");
        assert_eq!(s(&n("123.456")), "123.456");
        assert_eq!(s(&n(".5")), ".5");
        assert_eq!(s(&n("-42")), "-42");
        assert_eq!(s(&n("007")), "7");
    }

    #[test]
    fn test_parse_rejects_bad_digits() {
        assert_eq!(Number::parse("1A", 10), Err(Error::BadNumString));
        assert_eq!(Number::parse("1.2.3", 10), Err(Error::BadNumString));
        assert!(Number::parse("FF", 16).is_ok());
    }

    #[test]
    fn test_add_sub_signs() {
        assert_eq!(s(&n("2").add(&n("3"), 0).unwrap()), "5");
        assert_eq!(s(&n("2").sub(&n("3"), 0).unwrap()), "-1");
        assert_eq!(s(&n("-2").add(&n("-3"), 0).unwrap()), "-5");
        assert_eq!(s(&n("-2").add(&n("3"), 0).unwrap()), "1");
        assert_eq!(s(&n("2.5").add(&n("0.75"), 0).unwrap()), "3.25");
        assert_eq!(s(&n("1").sub(&n("1"), 0).unwrap()), "0");
    }

    #[test]
    fn test_mul_scales() {
        assert_eq!(s(&n("12").mul(&n("12"), 0).unwrap()), "144");
        assert_eq!(s(&n("0.5").mul(&n("0.5"), 0).unwrap()), ".25");
        assert_eq!(s(&n("-3").mul(&n("3"), 0).unwrap()), "-9");
        // Result scale caps at rdx_a + rdx_b.
        assert_eq!(s(&n("0.5").mul(&n("0.5"), 10).unwrap()), ".25");
    }

    #[test]
    fn test_div() {
        assert_eq!(s(&n("1").div(&n("3"), 20).unwrap()), ".33333333333333333333");
        assert_eq!(s(&n("10").div(&n("2"), 0).unwrap()), "5");
        assert_eq!(s(&n("10").div(&n("4"), 2).unwrap()), "2.50");
        assert_eq!(n("1").div(&n("0"), 0), Err(Error::DivideByZero));
        assert_eq!(s(&n("1").div(&n("0.0005"), 0).unwrap()), "2000");
    }

    #[test]
    fn test_rem_sign_follows_dividend() {
        assert_eq!(s(&n("7").rem(&n("3"), 0).unwrap()), "1");
        assert_eq!(s(&n("-7").rem(&n("3"), 0).unwrap()), "-1");
        assert_eq!(s(&n("7").rem(&n("-3"), 0).unwrap()), "1");
    }

    #[test]
    fn test_pow() {
        assert_eq!(s(&n("2").pow(&n("10"), 0).unwrap()), "1024");
        assert_eq!(s(&n("2").pow(&n("0"), 0).unwrap()), "1");
        assert_eq!(s(&n("2").pow(&n("-2"), 4).unwrap()), ".2500");
        assert_eq!(s(&n("-2").pow(&n("3"), 0).unwrap()), "-8");
        assert_eq!(n("2").pow(&n("1.5"), 0), Err(Error::NonInteger));
    }

    #[test]
    fn test_sqrt() {
        assert_eq!(s(&n("4").sqrt(0).unwrap()), "2");
        assert_eq!(s(&n("0").sqrt(5).unwrap()), "0");
        assert_eq!(
            s(&n("2").sqrt(10).unwrap()),
            "1.4142135623"
        );
        assert_eq!(n("-1").sqrt(0), Err(Error::Negative));
    }

    #[test]
    fn test_karatsuba_matches_known_squares() {
        // (10^199 + 1)^2 = 10^398 + 2*10^199 + 1, well above the cutoff.
        let mut a = String::from("1");
        a.push_str(&"0".repeat(198));
        a.push('1');
        let sq = n(&a).mul(&n(&a), 0).unwrap();
        let mut expect = String::from("1");
        expect.push_str(&"0".repeat(198));
        expect.push('2');
        expect.push_str(&"0".repeat(198));
        expect.push('1');
        assert_eq!(s(&sq), expect);

        // (10^200 - 1)^2 = 10^400 - 2*10^200 + 1.
        let nines = "9".repeat(200);
        let sq = n(&nines).mul(&n(&nines), 0).unwrap();
        let mut expect = "9".repeat(199);
        expect.push('8');
        expect.push_str(&"0".repeat(199));
        expect.push('1');
        assert_eq!(s(&sq), expect);
    }

    #[test]
    fn test_base_output() {
        assert_eq!(render(&n("255"), 16), "FF");
        assert_eq!(render(&n("255"), 2), "11111111");
        assert_eq!(render(&n("-26"), 16), "-1A");
        assert_eq!(render(&n("0.5"), 16), ".8");
        // Bases above 16 print space-separated decimal blocks.
        assert_eq!(render(&n("100"), 100), " 01 00");
    }

    #[test]
    fn test_base_input() {
        assert_eq!(s(&Number::parse("FF", 16).unwrap()), "255");
        assert_eq!(s(&Number::parse("11111111", 2).unwrap()), "255");
        assert_eq!(s(&Number::parse(".8", 16).unwrap()), ".5");
    }

    #[test]
    fn test_to_u64() {
        assert_eq!(n("123").to_u64().unwrap(), 123);
        assert_eq!(n("12.99").to_u64().unwrap(), 12);
        assert_eq!(n("-1").to_u64(), Err(Error::Negative));
        assert_eq!(n("99999999999999999999999").to_u64(), Err(Error::Overflow));
    }

    #[test]
    fn test_cmp() {
        assert!(n("1").cmp(&n("2")).unwrap() < 0);
        assert!(n("2").cmp(&n("1")).unwrap() > 0);
        assert_eq!(n("1.50").cmp(&n("1.5")).unwrap(), 0);
        assert!(n("-100").cmp(&n("-5")).unwrap() < 0);
        assert!(n("-1").cmp(&n("1")).unwrap() < 0);
        assert!(n("0").cmp(&n("-1")).unwrap() > 0);
    }

    #[test]
    fn test_modexp() {
        let r = n("4").modexp(&n("13"), &n("497")).unwrap();
        assert_eq!(s(&r), "445");
        assert_eq!(n("2").modexp(&n("10"), &n("0")), Err(Error::DivideByZero));
    }
}
