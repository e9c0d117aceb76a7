//! Reporting: CSV exports and HTML documents (invoice, receipt).

use chrono::Local;
use rusqlite::Connection;

use crate::entities::payment::{self, RentPayment};
use crate::entities::tenant;
use crate::entities::utility;
use crate::error::{AppError, Result};
use crate::invoice::Invoice;

/// A CSV document ready to be served as an attachment.
#[derive(Debug, Clone)]
pub struct CsvExport {
    pub filename: String,
    pub content: String,
}

/// All payments for one tenant, oldest first. Filename derives from the
/// tenant name with spaces replaced by underscores.
pub fn export_tenant_payments(conn: &Connection, tenant_id: i64) -> Result<CsvExport> {
    let tenant = tenant::get_tenant(conn, tenant_id)?;
    let mut payments = payment::list_payments_for_tenant(conn, tenant_id)?;
    payments.reverse(); // list is newest-first; exports read oldest-first

    if payments.is_empty() {
        return Err(AppError::NotFound(
            "No payments found for this tenant".to_string(),
        ));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["Payment ID", "Payment Date", "Amount", "Method", "Notes"])
        .map_err(csv_error)?;
    for p in &payments {
        writer
            .write_record([
                p.id.to_string(),
                p.payment_date.to_string(),
                format!("{:.2}", p.amount),
                p.payment_method.clone().unwrap_or_default(),
                p.notes.clone().unwrap_or_default(),
            ])
            .map_err(csv_error)?;
    }

    Ok(CsvExport {
        filename: format!("payments_{}_{}.csv", tenant.name.replace(' ', "_"), tenant_id),
        content: writer_to_string(writer)?,
    })
}

/// Every utility bill with its category name, oldest period first.
pub fn export_bills(conn: &Connection) -> Result<CsvExport> {
    let mut bills = utility::list_bills(conn)?;
    bills.reverse();

    if bills.is_empty() {
        return Err(AppError::NotFound("No utility bills found".to_string()));
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "Bill ID",
            "Category",
            "Billing Start",
            "Billing End",
            "Bill Date",
            "Total Amount",
            "Usage Data",
            "Notes",
        ])
        .map_err(csv_error)?;
    for b in &bills {
        writer
            .write_record([
                b.id.to_string(),
                b.category_name.clone().unwrap_or_default(),
                b.billing_period_start.to_string(),
                b.billing_period_end.to_string(),
                b.bill_date.map(|d| d.to_string()).unwrap_or_default(),
                format!("{:.2}", b.total_amount),
                b.usage_data.clone().unwrap_or_default(),
                b.notes.clone().unwrap_or_default(),
            ])
            .map_err(csv_error)?;
    }

    Ok(CsvExport {
        filename: "utility_bills.csv".to_string(),
        content: writer_to_string(writer)?,
    })
}

fn csv_error(e: csv::Error) -> AppError {
    AppError::Validation(format!("CSV write error: {}", e))
}

fn writer_to_string(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Validation(format!("CSV write error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Validation(format!("CSV encoding error: {}", e)))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Renders the monthly invoice as a standalone HTML document.
pub fn render_invoice_html(invoice: &Invoice) -> String {
    let mut splits_rows = String::new();
    for split in &invoice.utility_splits {
        splits_rows.push_str(&format!(
            "<tr><td>Utility share (split #{})</td><td class=\"amount\">${:.2}</td></tr>\n",
            split.id, split.amount_owed
        ));
    }

    let mut payment_rows = String::new();
    for payment in &invoice.payments {
        payment_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td class=\"amount\">${:.2}</td></tr>\n",
            payment.payment_date,
            escape(payment.payment_method.as_deref().unwrap_or("-")),
            payment.amount
        ));
    }
    if payment_rows.is_empty() {
        payment_rows.push_str("<tr><td colspan=\"3\">No payments recorded this month</td></tr>\n");
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Invoice - {name} - {month}</title>\n\
         <style>body{{font-family:sans-serif;max-width:700px;margin:2em auto}}\
         table{{width:100%;border-collapse:collapse}}\
         td,th{{border:1px solid #ccc;padding:6px;text-align:left}}\
         .amount{{text-align:right}}.totals td{{font-weight:bold}}</style>\n\
         </head>\n<body>\n\
         <h1>Monthly Invoice</h1>\n\
         <p><strong>Tenant:</strong> {name}<br>\
         <strong>Period:</strong> {month}<br>\
         <strong>Invoice date:</strong> {invoice_date}</p>\n\
         <h2>Charges</h2>\n<table>\n\
         <tr><td>Base rent</td><td class=\"amount\">${base_rent:.2}</td></tr>\n\
         {splits_rows}\
         <tr class=\"totals\"><td>Utilities subtotal</td><td class=\"amount\">${total_utilities:.2}</td></tr>\n\
         <tr class=\"totals\"><td>Balance forward</td><td class=\"amount\">${balance_forward:.2}</td></tr>\n\
         <tr class=\"totals\"><td>Total due</td><td class=\"amount\">${total_due:.2}</td></tr>\n\
         </table>\n\
         <h2>Payments received</h2>\n<table>\n\
         <tr><th>Date</th><th>Method</th><th>Amount</th></tr>\n\
         {payment_rows}\
         <tr class=\"totals\"><td colspan=\"2\">Total paid</td><td class=\"amount\">${total_paid:.2}</td></tr>\n\
         </table>\n</body>\n</html>\n",
        name = escape(&invoice.tenant.name),
        month = invoice.month_label,
        invoice_date = invoice.invoice_date,
        base_rent = invoice.base_rent,
        splits_rows = splits_rows,
        total_utilities = invoice.total_utilities,
        balance_forward = invoice.balance_forward,
        total_due = invoice.total_due,
        payment_rows = payment_rows,
        total_paid = invoice.total_paid,
    )
}

/// Renders a payment receipt as a standalone HTML document.
pub fn render_receipt_html(payment: &RentPayment, tenant_name: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Receipt #{id}</title>\n\
         <style>body{{font-family:sans-serif;max-width:500px;margin:2em auto}}</style>\n\
         </head>\n<body>\n\
         <h1>Payment Receipt</h1>\n\
         <p><strong>Receipt #:</strong> {id}<br>\
         <strong>Tenant:</strong> {name}<br>\
         <strong>Payment date:</strong> {date}<br>\
         <strong>Amount:</strong> ${amount:.2}<br>\
         <strong>Method:</strong> {method}<br>\
         <strong>Issued:</strong> {issued}</p>\n\
         </body>\n</html>\n",
        id = payment.id,
        name = escape(tenant_name),
        date = payment.payment_date,
        amount = payment.amount,
        method = escape(payment.payment_method.as_deref().unwrap_or("-")),
        issued = Local::now().date_naive(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::entities::payment::{create_payment, NewPayment};
    use crate::entities::tenant::{create_tenant, NewTenant};
    use crate::invoice::build_invoice;
    use chrono::NaiveDate;

    fn tenant_named(name: &str) -> NewTenant {
        NewTenant {
            name: name.to_string(),
            base_rent_amount: 1000.0,
            email: None,
            phone: None,
            move_in_date: None,
            notes: None,
            is_active: None,
        }
    }

    #[test]
    fn test_payments_export_columns_and_filename() {
        let conn = db::open_test();
        let t = create_tenant(&conn, &tenant_named("Ana Maria Lopez")).unwrap();
        create_payment(
            &conn,
            t.id,
            &NewPayment {
                amount: 500.0,
                payment_date: NaiveDate::from_ymd_opt(2025, 3, 10),
                payment_method: Some("Bank Transfer".to_string()),
                notes: None,
            },
        )
        .unwrap();

        let export = export_tenant_payments(&conn, t.id).unwrap();

        assert_eq!(export.filename, format!("payments_Ana_Maria_Lopez_{}.csv", t.id));
        let mut lines = export.content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Payment ID,Payment Date,Amount,Method,Notes"
        );
        assert!(lines.next().unwrap().contains("Bank Transfer"));
    }

    #[test]
    fn test_payments_export_empty_is_not_found() {
        let conn = db::open_test();
        let t = create_tenant(&conn, &tenant_named("Alice")).unwrap();
        let err = export_tenant_payments(&conn, t.id).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_invoice_html_contains_totals() {
        let conn = db::open_test();
        let t = create_tenant(&conn, &tenant_named("Alice")).unwrap();
        let invoice = build_invoice(&conn, t.id, 2025, 3).unwrap();

        let html = render_invoice_html(&invoice);
        assert!(html.contains("March 2025"));
        assert!(html.contains("$1000.00"));
        assert!(html.contains("No payments recorded this month"));
    }

    #[test]
    fn test_receipt_html_escapes_tenant_name() {
        let conn = db::open_test();
        let t = create_tenant(&conn, &tenant_named("A <b> Co")).unwrap();
        let p = create_payment(
            &conn,
            t.id,
            &NewPayment {
                amount: 42.0,
                payment_date: NaiveDate::from_ymd_opt(2025, 3, 1),
                payment_method: None,
                notes: None,
            },
        )
        .unwrap();

        let html = render_receipt_html(&p, &t.name);
        assert!(html.contains("A &lt;b&gt; Co"));
        assert!(html.contains("$42.00"));
    }
}
