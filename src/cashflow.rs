// Loan and yield math for graded properties.
// Standard amortized-loan payment formula
// (http://www.financeformulas.net/Loan_Payment_Formula.html) plus the
// rough carrying-cost assumptions used when grading rental yield.

/// Annual percentage rate assumed when none is given.
pub const DEFAULT_RATE: f64 = 6.0;

/// Loan term in years assumed when none is given.
pub const DEFAULT_TERM_YEARS: f64 = 30.0;

/// Monthly payment for a loan.
///
/// `rate` is the annual percentage rate (6.0 = 6%), `balance` the loan
/// amount, `term_months` the term in months.
pub fn payment(rate: f64, balance: f64, term_months: f64) -> f64 {
    // Monthly decimal rate.
    let r = rate / 1200.0;
    (r * balance) / (1.0 - (1.0 + r).powf(-term_months))
}

/// Monthly property taxes: 1.28% of price per year.
pub fn taxes(price: f64) -> f64 {
    price * 0.0128 / 12.0
}

/// Monthly insurance: flat 700/year.
pub fn insurance(_price: f64) -> f64 {
    700.0 / 12.0
}

/// Loan amount supportable by the rent after taxes and insurance, capped
/// at 70% of the purchase price. None when price or rent is unusable.
pub fn loan_amount(price: f64, rent: f64, rate: f64, term_months: f64) -> Option<f64> {
    if price == 0.0 || rent == 0.0 {
        return None;
    }

    // Payment per dollar borrowed, used to invert the payment formula.
    let unit_payment = payment(rate, 1.0, term_months);
    let supportable = 0.7 * (rent - taxes(price) - insurance(price)) / unit_payment;
    Some(supportable.min(0.7 * price))
}

/// Annualized return on the cash left in the deal.
pub fn net_return(price: f64, loan_amount: f64, noi: f64) -> f64 {
    1200.0 * noi / (price - loan_amount)
}

/// Monthly cash left after payment, taxes and insurance.
pub fn piti(price: f64, rent: f64, payment: f64, taxes: f64) -> f64 {
    rent - payment - taxes - insurance(price)
}

/// Cash yield with the default rate and term. None for zero price or rent.
pub fn cash_yield(price: f64, rent: f64) -> Option<f64> {
    if price == 0.0 || rent == 0.0 {
        return None;
    }

    let taxes = taxes(price);
    let term_months = DEFAULT_TERM_YEARS * 12.0;
    let loan = loan_amount(price, rent, DEFAULT_RATE, term_months)?;
    let pmt = payment(DEFAULT_RATE, loan, term_months);
    let noi = rent - piti(price, rent, pmt, taxes);
    Some(net_return(price, loan, noi))
}
