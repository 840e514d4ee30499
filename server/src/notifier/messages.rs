use crate::models::Event;
use crate::notifier::TicketLine;
use crate::pricing::format_show_date;

#[derive(Debug, Clone, PartialEq)]
pub struct MailBody {
    pub subject: String,
    pub text: String,
}

fn ticket_list(tickets: &[TicketLine]) -> String {
    tickets
        .iter()
        .map(|ticket| {
            format!(
                "{} - {} - {}\n",
                ticket.title,
                ticket.ticket_description,
                format_show_date(ticket.show_date)
            )
        })
        .collect()
}

pub fn confirmation(name: &str, tickets: &[TicketLine], signoff: &str) -> MailBody {
    MailBody {
        subject: "Your payment and ticket reservation are confirmed".to_string(),
        text: format!(
            "Hi {name},\n\nThank you for your payment and ticket reservation. \
             Below are your event details.\n\n{}\n- {signoff}",
            ticket_list(tickets)
        ),
    }
}

pub fn payment_failed(name: &str, reason: &str, tickets: &[TicketLine], signoff: &str) -> MailBody {
    MailBody {
        subject: "Your payment failed".to_string(),
        text: format!(
            "Hi {name},\n\nYour payment failed with the following issue: {reason}\n\n\
             Reservation/s attached with the payment:\n{}\n- {signoff}",
            ticket_list(tickets)
        ),
    }
}

pub fn refund_or_cancelled(name: &str, title: &str, ticket_description: &str, signoff: &str) -> MailBody {
    MailBody {
        subject: format!("Your payment for {title} was refunded/cancelled"),
        text: format!(
            "Hi {name},\n\nThe event reservation you've booked: {title} - {ticket_description}, \
             was cancelled and your payment was refunded.\n\
             If you didn't pay yet, the pending payment is now cancelled.\n\
             Sorry for the inconvenience.\n\n- {signoff}"
        ),
    }
}

pub fn refund_error_alert() -> MailBody {
    MailBody {
        subject: "A refund request has failed".to_string(),
        text: "A refund request has failed. Please check logs.".to_string(),
    }
}

pub fn event_updated(name: &str, event: &Event, signoff: &str) -> MailBody {
    let organizer = event
        .organizer
        .as_deref()
        .map(str::trim)
        .filter(|organizer| !organizer.is_empty())
        .map(|organizer| format!("Organizer: {organizer}\n"))
        .unwrap_or_default();

    MailBody {
        subject: "Your booked event was updated".to_string(),
        text: format!(
            "Hi {name},\n\nYou are receiving this email because your booked event has been updated. \
             Please refer to details below.\n\nTitle: {}\nDescription: {}\n{organizer}\n- {signoff}",
            event.title, event.description
        ),
    }
}
