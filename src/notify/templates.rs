//! Message builders. Pure functions from domain data to subject and HTML body;
//! the branded frame is applied by the dispatcher.

use crate::models::{Money, SeatId};
use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc};

const ACCENT: &str = "#F84565";

#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub subject: String,
    pub body_html: String,
}

#[derive(Debug, Clone)]
pub struct Branding {
    pub name: String,
    pub website_url: String,
    pub support_email: String,
    /// Offset show times are printed in.
    pub offset: FixedOffset,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            name: "Marquee Cinema".to_string(),
            website_url: "https://marquee.example".to_string(),
            support_email: "support@marquee.example".to_string(),
            offset: Utc.fix(),
        }
    }
}

impl Branding {
    /// Wraps a body in the shared header and footer.
    pub fn wrap(&self, body: &str, title: &str) -> String {
        let year = Utc::now().with_timezone(&self.offset).year();
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
</head>
<body style="margin: 0; padding: 0; background-color: #f4f4f4; font-family: Arial, sans-serif;">
  <table role="presentation" style="width: 100%; border-collapse: collapse;">
    <tr>
      <td align="center" style="padding: 40px 0;">
        <table role="presentation" style="width: 600px; border-collapse: collapse; background-color: #ffffff; border-radius: 8px;">
          <tr>
            <td style="padding: 30px; background-color: {ACCENT}; border-radius: 8px 8px 0 0;">
              <h1 style="margin: 0; color: #ffffff; font-size: 28px; text-align: center;">{name}</h1>
            </td>
          </tr>
          <tr>
            <td style="padding: 40px 30px;">
              {body}
            </td>
          </tr>
          <tr>
            <td style="padding: 20px 30px; background-color: #f8f9fa; border-radius: 0 0 8px 8px; text-align: center;">
              <p style="margin: 0; color: #6c757d; font-size: 12px;">&copy; {year} {name}. All rights reserved.</p>
              <p style="margin: 10px 0 0 0; color: #6c757d; font-size: 12px;">
                Need help? <a href="mailto:{support}" style="color: {ACCENT}; text-decoration: none;">Contact Support</a>
              </p>
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#,
            title = escape(title),
            name = escape(&self.name),
            support = escape(&self.support_email),
        )
    }

    fn date(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format("%B %-d, %Y").to_string()
    }

    fn time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format("%-I:%M %p").to_string()
    }

    fn call_to_action(&self, label: &str) -> String {
        format!(
            r#"<div style="text-align: center; margin: 30px 0;">
  <a href="{url}" style="background-color: {ACCENT}; color: white; padding: 12px 30px; text-decoration: none; border-radius: 5px; font-weight: bold; display: inline-block;">{label}</a>
</div>"#,
            url = escape(&self.website_url),
            label = escape(label),
        )
    }
}

pub struct ConfirmedBooking<'a> {
    pub customer_name: &'a str,
    pub movie_title: &'a str,
    pub starts_at: DateTime<Utc>,
    pub seats: &'a [SeatId],
    pub amount: Money,
}

pub fn booking_confirmed(brand: &Branding, booking: &ConfirmedBooking<'_>) -> EmailContent {
    let title = escape(booking.movie_title);
    let seats = booking
        .seats
        .iter()
        .map(SeatId::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let body_html = format!(
        r#"<h2>Hi {name},</h2>
<p>Your booking for <strong style="color: {ACCENT};">"{title}"</strong> is confirmed!</p>
<div style="background-color: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0;">
  <p style="margin: 5px 0;"><strong>Movie:</strong> {title}</p>
  <p style="margin: 5px 0;"><strong>Date:</strong> {date}</p>
  <p style="margin: 5px 0;"><strong>Time:</strong> {time}</p>
  <p style="margin: 5px 0;"><strong>Seats:</strong> {seats}</p>
  <p style="margin: 5px 0;"><strong>Total:</strong> {amount}</p>
</div>
<p style="font-size: 18px;">Enjoy the show!</p>
<p>Thanks for booking with us!</p>"#,
        name = escape(booking.customer_name),
        date = brand.date(booking.starts_at),
        time = brand.time(booking.starts_at),
        seats = escape(&seats),
        amount = booking.amount,
    );

    EmailContent {
        subject: format!("Payment Confirmation: \"{}\" booked!", booking.movie_title),
        body_html,
    }
}

pub fn booking_cancelled(
    brand: &Branding,
    customer_name: &str,
    movie_title: &str,
    reason: &str,
) -> EmailContent {
    let body_html = format!(
        r#"<h2>Hi {name},</h2>
<p>We're sorry, but your booking for <strong style="color: {ACCENT};">"{title}"</strong> has been cancelled.</p>
<div style="background-color: #f8d7da; padding: 20px; border-left: 4px solid #dc3545; margin: 20px 0;">
  <p style="margin: 0; color: #721c24;"><strong>Reason:</strong> {reason}</p>
</div>
<p>Your seats have been released and are now available for other customers.</p>
{cta}
<p style="color: #6c757d; font-size: 14px;">If you have any questions, please contact our support team.</p>"#,
        name = escape(customer_name),
        title = escape(movie_title),
        reason = escape(reason),
        cta = brand.call_to_action("Book Again"),
    );

    EmailContent {
        subject: format!("Booking Cancelled: \"{}\"", movie_title),
        body_html,
    }
}

pub fn show_reminder(
    brand: &Branding,
    customer_name: &str,
    movie_title: &str,
    starts_at: DateTime<Utc>,
    lead_hours: i64,
) -> EmailContent {
    let body_html = format!(
        r#"<h2>Hello {name},</h2>
<p>This is a quick reminder that your movie is starting soon!</p>
<div style="background-color: #fff3cd; padding: 20px; border-left: 4px solid {ACCENT}; margin: 20px 0;">
  <h3 style="margin: 0 0 10px 0; color: {ACCENT};">"{title}"</h3>
  <p style="margin: 5px 0;"><strong>Date:</strong> {date}</p>
  <p style="margin: 5px 0;"><strong>Time:</strong> {time}</p>
</div>
<p style="font-size: 16px; color: #856404;"><strong>Starting within {lead_hours} hours</strong>, make sure you're ready!</p>
<p>See you at the cinema!</p>"#,
        name = escape(customer_name),
        title = escape(movie_title),
        date = brand.date(starts_at),
        time = brand.time(starts_at),
    );

    EmailContent {
        subject: format!("Reminder: Your movie \"{}\" starts soon!", movie_title),
        body_html,
    }
}

pub fn new_show_announcement(
    brand: &Branding,
    recipient_name: &str,
    movie_title: &str,
    movie_description: &str,
) -> EmailContent {
    let description = if movie_description.is_empty() {
        String::new()
    } else {
        format!(
            r#"<p style="color: #6c757d; margin: 10px 0;">{}</p>"#,
            escape(movie_description)
        )
    };
    let body_html = format!(
        r#"<h2>Hi {name},</h2>
<p>We've just added an exciting new show to our library!</p>
<div style="background-color: #f8f9fa; padding: 25px; border-radius: 8px; margin: 20px 0; text-align: center;">
  <h3 style="color: {ACCENT}; font-size: 24px; margin: 0 0 10px 0;">"{title}"</h3>
  {description}
</div>
{cta}
<p style="color: #6c757d; font-size: 14px;">Don't miss out, book your tickets today!</p>"#,
        name = escape(recipient_name),
        title = escape(movie_title),
        cta = brand.call_to_action("Book Now"),
    );

    EmailContent {
        subject: format!("New Show Added: {}", movie_title),
        body_html,
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
