use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{Mailbox, Message, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{authentication::Credentials, client::TlsParametersBuilder},
};

/// Get the staging prefix for email subjects
/// Returns "[STAGING] " if SHILOH_ENV=staging, empty string otherwise
fn get_staging_prefix() -> &'static str {
    match std::env::var("SHILOH_ENV").unwrap_or_default().as_str() {
        "staging" => "[STAGING] ",
        _ => "",
    }
}

/// Create a properly formatted Mailbox with display name
fn create_mailbox(name: &str, email: &str) -> Result<Mailbox> {
    let address = email.parse()?;
    Ok(Mailbox::new(Some(name.to_string()), address))
}

/// Format a cent amount for display, e.g. 2500 -> "$25.00"
fn format_amount(amount_cents: i64, currency: &str) -> String {
    let symbol = match currency.to_ascii_lowercase().as_str() {
        "usd" => "$",
        "gbp" => "\u{a3}",
        "eur" => "\u{20ac}",
        _ => "",
    };
    if symbol.is_empty() {
        format!(
            "{}.{:02} {}",
            amount_cents / 100,
            amount_cents % 100,
            currency.to_uppercase()
        )
    } else {
        format!("{}{}.{:02}", symbol, amount_cents / 100, amount_cents % 100)
    }
}

/// Simple HTML escaping
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Outbound email, one method per template. Every method returns a plain
/// Result; the webhook pipeline logs and swallows failures so a mail outage
/// never fails giving-event processing.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn donation_receipt(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
        purpose: Option<&str>,
    ) -> Result<()>;

    async fn donation_failed(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
        reason: Option<&str>,
    ) -> Result<()>;

    async fn refund_confirmation(
        &self,
        to_email: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<()>;

    async fn subscription_confirmation(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: Option<i64>,
        currency: Option<&str>,
        interval: Option<&str>,
    ) -> Result<()>;

    async fn subscription_canceled(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
    ) -> Result<()>;

    async fn recurring_receipt(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
    ) -> Result<()>;

    async fn recurring_payment_failed(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
        next_attempt: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Forward a contact-form submission to the office inbox.
    async fn contact_message(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
        subject: &str,
        message: &str,
        message_type: &str,
    ) -> Result<()>;

    /// Tell the office a gift came in.
    async fn admin_donation_notification(
        &self,
        amount_cents: i64,
        currency: &str,
        donor_email: Option<&str>,
        purpose: Option<&str>,
    ) -> Result<()>;

    /// Tell the office a webhook event was recorded but its effects failed.
    async fn admin_processing_alert(
        &self,
        event_id: &str,
        event_type: &str,
        error: &str,
    ) -> Result<()>;
}

pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
    admin_email: String,
}

impl EmailService {
    pub fn new() -> Result<Self> {
        let smtp_server = std::env::var("SMTP_SERVER")
            .map_err(|_| anyhow::anyhow!("SMTP_SERVER environment variable not set"))?;

        let smtp_port: u16 = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid SMTP_PORT"))?;

        let smtp_username = std::env::var("SMTP_USERNAME")
            .map_err(|_| anyhow::anyhow!("SMTP_USERNAME environment variable not set"))?;

        let smtp_password = std::env::var("SMTP_PASSWORD")
            .map_err(|_| anyhow::anyhow!("SMTP_PASSWORD environment variable not set"))?;

        let from_email = std::env::var("FROM_EMAIL")
            .map_err(|_| anyhow::anyhow!("FROM_EMAIL environment variable not set"))?;

        let from_name =
            std::env::var("FROM_NAME").unwrap_or_else(|_| "Shiloh Connection".to_string());

        let admin_email = std::env::var("ADMIN_EMAIL")
            .map_err(|_| anyhow::anyhow!("ADMIN_EMAIL environment variable not set"))?;

        let creds = Credentials::new(smtp_username, smtp_password);

        // Configure SMTP transport based on port:
        // - Port 1025: Insecure (Mailpit for local testing)
        // - Port 465: Implicit TLS (TLS wrapper - immediate TLS connection)
        // - Port 587: STARTTLS (start plain, upgrade to TLS)
        let mailer = if smtp_port == 1025 {
            tracing::info!("Using insecure SMTP connection for port 1025 (Mailpit) without TLS");
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_server)
                .port(smtp_port)
                .tls(lettre::transport::smtp::client::Tls::None)
                .build()
        } else if smtp_port == 465 {
            tracing::info!("Using implicit TLS (SMTPS) for port 465");
            let tls_params = TlsParametersBuilder::new(smtp_server.clone())
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create TLS parameters: {}", e))?;
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_server)?
                .port(smtp_port)
                .credentials(creds)
                .tls(lettre::transport::smtp::client::Tls::Wrapper(tls_params))
                .build()
        } else {
            tracing::info!("Using STARTTLS for port {}", smtp_port);
            let tls_params = TlsParametersBuilder::new(smtp_server.clone())
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create TLS parameters: {}", e))?;
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_server)?
                .port(smtp_port)
                .credentials(creds)
                .tls(lettre::transport::smtp::client::Tls::Required(tls_params))
                .build()
        };

        Ok(Self {
            mailer,
            from_email,
            from_name,
            admin_email,
        })
    }

    async fn send_html(
        &self,
        to_email: &str,
        to_name: &str,
        subject: String,
        text_body: String,
        html_body: String,
    ) -> Result<()> {
        let email = Message::builder()
            .from(create_mailbox(&self.from_name, &self.from_email)?)
            .to(create_mailbox(to_name, to_email)?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text_body))
                    .singlepart(SinglePart::html(html_body)),
            )?;

        self.mailer.send(email).await?;
        Ok(())
    }

    async fn send_plain(&self, to_email: &str, subject: String, body: String) -> Result<()> {
        let email = Message::builder()
            .from(create_mailbox(&self.from_name, &self.from_email)?)
            .to(to_email.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        self.mailer.send(email).await?;
        Ok(())
    }

    fn wrap_html(&self, heading: &str, body_html: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5; color: #333; }}
        .container {{ max-width: 560px; margin: 0 auto; background-color: white; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); overflow: hidden; }}
        .header {{ background: linear-gradient(135deg, #1e3a5f 0%, #2c5282 100%); color: white; padding: 24px; text-align: center; }}
        .header h1 {{ margin: 0; font-size: 22px; font-weight: 600; }}
        .content {{ padding: 24px; }}
        .amount {{ font-size: 28px; font-weight: 700; color: #1e3a5f; text-align: center; margin: 16px 0; }}
        .detail-row {{ display: flex; justify-content: space-between; padding: 10px 0; border-bottom: 1px solid #eee; }}
        .detail-row:last-child {{ border-bottom: none; }}
        .detail-label {{ color: #666; }}
        .detail-value {{ font-weight: 500; }}
        .footer {{ background-color: #f8f9fa; padding: 16px 24px; text-align: center; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header"><h1>{heading}</h1></div>
        <div class="content">{body_html}</div>
        <div class="footer"><p>The Church of the Lord, Shiloh Connection</p></div>
    </div>
</body>
</html>"#,
            heading = html_escape(heading),
            body_html = body_html,
        )
    }
}

fn greeting(donor_name: Option<&str>) -> String {
    match donor_name {
        Some(name) if !name.is_empty() => format!("Dear {},", name),
        _ => "Dear friend,".to_string(),
    }
}

#[async_trait]
impl Notifier for EmailService {
    async fn donation_receipt(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
        purpose: Option<&str>,
    ) -> Result<()> {
        let amount = format_amount(amount_cents, currency);
        let purpose_line = purpose
            .filter(|p| !p.is_empty())
            .map(|p| format!("Purpose: {}\n", p))
            .unwrap_or_default();
        let subject = format!("{}Thank You for Your Donation", get_staging_prefix());

        let text_body = format!(
            r#"{greeting}

Thank you for your generous gift of {amount}.
{purpose_line}
Your giving supports the ministry and outreach of the church. This email
serves as your receipt; please keep it for your records.

With gratitude,
The Church of the Lord"#,
            greeting = greeting(donor_name),
            amount = amount,
            purpose_line = purpose_line,
        );

        let html_inner = format!(
            r#"<p>{greeting}</p>
<p>Thank you for your generous gift.</p>
<div class="amount">{amount}</div>
{purpose_html}
<p>Your giving supports the ministry and outreach of the church. This email serves as your receipt; please keep it for your records.</p>
<p>With gratitude,<br>The Church of the Lord</p>"#,
            greeting = html_escape(&greeting(donor_name)),
            amount = html_escape(&amount),
            purpose_html = purpose
                .filter(|p| !p.is_empty())
                .map(|p| format!(
                    r#"<div class="detail-row"><span class="detail-label">Purpose</span><span class="detail-value">{}</span></div>"#,
                    html_escape(p)
                ))
                .unwrap_or_default(),
        );
        let html_body = self.wrap_html("Donation Received", &html_inner);

        self.send_html(
            to_email,
            donor_name.unwrap_or(""),
            subject,
            text_body,
            html_body,
        )
        .await
    }

    async fn donation_failed(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let amount = format_amount(amount_cents, currency);
        let reason_line = reason
            .filter(|r| !r.is_empty())
            .map(|r| format!("The payment provider reported: {}\n\n", r))
            .unwrap_or_default();
        let subject = format!("{}Your Donation Could Not Be Processed", get_staging_prefix());

        let text_body = format!(
            r#"{greeting}

Unfortunately your donation of {amount} could not be processed.

{reason_line}No money has been taken. You are welcome to try again with a
different payment method, or contact the church office if the problem
persists.

The Church of the Lord"#,
            greeting = greeting(donor_name),
            amount = amount,
            reason_line = reason_line,
        );

        let html_inner = format!(
            r#"<p>{greeting}</p>
<p>Unfortunately your donation of <strong>{amount}</strong> could not be processed.</p>
{reason_html}
<p>No money has been taken. You are welcome to try again with a different payment method, or contact the church office if the problem persists.</p>"#,
            greeting = html_escape(&greeting(donor_name)),
            amount = html_escape(&amount),
            reason_html = reason
                .filter(|r| !r.is_empty())
                .map(|r| format!("<p>The payment provider reported: {}</p>", html_escape(r)))
                .unwrap_or_default(),
        );
        let html_body = self.wrap_html("Payment Unsuccessful", &html_inner);

        self.send_html(
            to_email,
            donor_name.unwrap_or(""),
            subject,
            text_body,
            html_body,
        )
        .await
    }

    async fn refund_confirmation(
        &self,
        to_email: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<()> {
        let amount = format_amount(amount_cents, currency);
        let subject = format!("{}Your Refund Has Been Issued", get_staging_prefix());

        let body = format!(
            r#"Dear friend,

A refund of {amount} has been issued to your original payment method.
Depending on your bank it may take 5-10 business days to appear.

If you have any questions, please contact the church office.

The Church of the Lord"#,
            amount = amount,
        );

        self.send_plain(to_email, subject, body).await
    }

    async fn subscription_confirmation(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: Option<i64>,
        currency: Option<&str>,
        interval: Option<&str>,
    ) -> Result<()> {
        let amount_line = match (amount_cents, currency) {
            (Some(cents), Some(cur)) => {
                let per = match interval {
                    Some("week") => " per week",
                    Some("month") => " per month",
                    Some("year") => " per year",
                    _ => "",
                };
                format!("{}{}", format_amount(cents, cur), per)
            }
            _ => "your chosen amount".to_string(),
        };
        let subject = format!("{}Your Recurring Giving Is Active", get_staging_prefix());

        let text_body = format!(
            r#"{greeting}

Thank you for setting up recurring giving of {amount_line}.

Each gift will be charged automatically and you will receive a receipt
every time a payment goes through. You can cancel at any time by
contacting the church office.

With gratitude,
The Church of the Lord"#,
            greeting = greeting(donor_name),
            amount_line = amount_line,
        );

        let html_inner = format!(
            r#"<p>{greeting}</p>
<p>Thank you for setting up recurring giving.</p>
<div class="amount">{amount_line}</div>
<p>Each gift will be charged automatically and you will receive a receipt every time a payment goes through. You can cancel at any time by contacting the church office.</p>
<p>With gratitude,<br>The Church of the Lord</p>"#,
            greeting = html_escape(&greeting(donor_name)),
            amount_line = html_escape(&amount_line),
        );
        let html_body = self.wrap_html("Recurring Giving Active", &html_inner);

        self.send_html(
            to_email,
            donor_name.unwrap_or(""),
            subject,
            text_body,
            html_body,
        )
        .await
    }

    async fn subscription_canceled(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
    ) -> Result<()> {
        let subject = format!("{}Your Recurring Giving Has Ended", get_staging_prefix());

        let body = format!(
            r#"{greeting}

Your recurring giving has been canceled and no further payments will be
taken. Thank you for everything you have given; it has made a real
difference.

You are always welcome to start again from the giving page.

With gratitude,
The Church of the Lord"#,
            greeting = greeting(donor_name),
        );

        self.send_plain(to_email, subject, body).await
    }

    async fn recurring_receipt(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
    ) -> Result<()> {
        let amount = format_amount(amount_cents, currency);
        let subject = format!("{}Recurring Gift Received", get_staging_prefix());

        let text_body = format!(
            r#"{greeting}

Your recurring gift of {amount} has been received. Thank you for your
faithful giving.

This email serves as your receipt; please keep it for your records.

With gratitude,
The Church of the Lord"#,
            greeting = greeting(donor_name),
            amount = amount,
        );

        let html_inner = format!(
            r#"<p>{greeting}</p>
<p>Your recurring gift has been received. Thank you for your faithful giving.</p>
<div class="amount">{amount}</div>
<p>This email serves as your receipt; please keep it for your records.</p>
<p>With gratitude,<br>The Church of the Lord</p>"#,
            greeting = html_escape(&greeting(donor_name)),
            amount = html_escape(&amount),
        );
        let html_body = self.wrap_html("Recurring Gift Received", &html_inner);

        self.send_html(
            to_email,
            donor_name.unwrap_or(""),
            subject,
            text_body,
            html_body,
        )
        .await
    }

    async fn recurring_payment_failed(
        &self,
        to_email: &str,
        donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
        next_attempt: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let amount = format_amount(amount_cents, currency);
        let retry_line = next_attempt
            .map(|at| {
                format!(
                    "We will automatically try again on {}.\n\n",
                    at.format("%B %-d, %Y")
                )
            })
            .unwrap_or_default();
        let subject = format!("{}Recurring Gift Payment Failed", get_staging_prefix());

        let body = format!(
            r#"{greeting}

Your recurring gift of {amount} could not be processed this time.

{retry_line}If your card has expired or been replaced, please update your
payment details from the giving page, or contact the church office for
help.

The Church of the Lord"#,
            greeting = greeting(donor_name),
            amount = amount,
            retry_line = retry_line,
        );

        self.send_plain(to_email, subject, body).await
    }

    async fn contact_message(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
        subject: &str,
        message: &str,
        message_type: &str,
    ) -> Result<()> {
        let mail_subject = format!(
            "{}Contact Form: {} [{}]",
            get_staging_prefix(),
            subject,
            message_type
        );

        let body = format!(
            r#"New contact form submission

From:    {name} <{email}>
Phone:   {phone}
Type:    {message_type}
Subject: {subject}
Time:    {timestamp}

Message:
{message}"#,
            name = name,
            email = email,
            phone = phone.unwrap_or("(not provided)"),
            message_type = message_type,
            subject = subject,
            timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            message = message,
        );

        self.send_plain(&self.admin_email, mail_subject, body)
            .await
    }

    async fn admin_donation_notification(
        &self,
        amount_cents: i64,
        currency: &str,
        donor_email: Option<&str>,
        purpose: Option<&str>,
    ) -> Result<()> {
        let amount = format_amount(amount_cents, currency);
        let subject = format!("{}New Donation Received - {}", get_staging_prefix(), amount);

        let body = format!(
            r#"A new donation has come in.

Amount:  {amount}
Donor:   {donor}
Purpose: {purpose}
Time:    {timestamp}"#,
            amount = amount,
            donor = donor_email.unwrap_or("(not provided)"),
            purpose = purpose.unwrap_or("Offering"),
            timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        );

        self.send_plain(&self.admin_email, subject, body)
            .await
    }

    async fn admin_processing_alert(
        &self,
        event_id: &str,
        event_type: &str,
        error: &str,
    ) -> Result<()> {
        let subject = format!(
            "{}Webhook Processing Failure - {}",
            get_staging_prefix(),
            event_type
        );

        let body = format!(
            r#"A webhook event was recorded but its effects could not be applied.
The event will not be retried by the sender; it needs manual review.

Event ID:   {event_id}
Event Type: {event_type}
Error:      {error}
Time:       {timestamp}"#,
            event_id = event_id,
            event_type = event_type,
            error = error,
            timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        );

        self.send_plain(&self.admin_email, subject, body)
            .await
    }
}

/// Fallback used when SMTP is not configured. Logs what would have been
/// sent so local development works without a mail server.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn donation_receipt(
        &self,
        to_email: &str,
        _donor_name: Option<&str>,
        amount_cents: i64,
        currency: &str,
        _purpose: Option<&str>,
    ) -> Result<()> {
        tracing::info!(to = %to_email, amount_cents, currency, "skipping donation receipt, SMTP not configured");
        Ok(())
    }

    async fn donation_failed(
        &self,
        to_email: &str,
        _donor_name: Option<&str>,
        amount_cents: i64,
        _currency: &str,
        _reason: Option<&str>,
    ) -> Result<()> {
        tracing::info!(to = %to_email, amount_cents, "skipping donation-failed notice, SMTP not configured");
        Ok(())
    }

    async fn refund_confirmation(
        &self,
        to_email: &str,
        amount_cents: i64,
        _currency: &str,
    ) -> Result<()> {
        tracing::info!(to = %to_email, amount_cents, "skipping refund confirmation, SMTP not configured");
        Ok(())
    }

    async fn subscription_confirmation(
        &self,
        to_email: &str,
        _donor_name: Option<&str>,
        _amount_cents: Option<i64>,
        _currency: Option<&str>,
        _interval: Option<&str>,
    ) -> Result<()> {
        tracing::info!(to = %to_email, "skipping subscription confirmation, SMTP not configured");
        Ok(())
    }

    async fn subscription_canceled(
        &self,
        to_email: &str,
        _donor_name: Option<&str>,
    ) -> Result<()> {
        tracing::info!(to = %to_email, "skipping cancellation notice, SMTP not configured");
        Ok(())
    }

    async fn recurring_receipt(
        &self,
        to_email: &str,
        _donor_name: Option<&str>,
        amount_cents: i64,
        _currency: &str,
    ) -> Result<()> {
        tracing::info!(to = %to_email, amount_cents, "skipping recurring receipt, SMTP not configured");
        Ok(())
    }

    async fn recurring_payment_failed(
        &self,
        to_email: &str,
        _donor_name: Option<&str>,
        amount_cents: i64,
        _currency: &str,
        _next_attempt: Option<DateTime<Utc>>,
    ) -> Result<()> {
        tracing::info!(to = %to_email, amount_cents, "skipping payment-failed notice, SMTP not configured");
        Ok(())
    }

    async fn contact_message(
        &self,
        name: &str,
        email: &str,
        _phone: Option<&str>,
        subject: &str,
        _message: &str,
        message_type: &str,
    ) -> Result<()> {
        tracing::info!(from = %email, %name, %subject, %message_type, "skipping contact forward, SMTP not configured");
        Ok(())
    }

    async fn admin_donation_notification(
        &self,
        amount_cents: i64,
        currency: &str,
        _donor_email: Option<&str>,
        _purpose: Option<&str>,
    ) -> Result<()> {
        tracing::info!(amount_cents, currency, "skipping admin notification, SMTP not configured");
        Ok(())
    }

    async fn admin_processing_alert(
        &self,
        event_id: &str,
        event_type: &str,
        error: &str,
    ) -> Result<()> {
        tracing::warn!(%event_id, %event_type, %error, "webhook processing failure (SMTP not configured, alert not emailed)");
        Ok(())
    }
}
